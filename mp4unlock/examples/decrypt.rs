use mp4unlock::{DecryptRequest, decrypt_file};
use std::{collections::HashMap, env};

fn main() {
    let mut args = env::args().skip(1);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        eprintln!("usage: decrypt <input> <output>");
        return;
    };

    let request = DecryptRequest {
        input: input.into(),
        output: output.into(),
        keys: HashMap::from([(
            "eb676abbcb345e96bbcf616630f1a3da".to_owned(),
            "100b6c20940f779a4589152b57d2dacb".to_owned(),
        )]),
    };

    decrypt_file(
        request,
        Some(|step: u32, total: u32| println!("{step}/{total}")),
        |result| match result {
            Ok(()) => println!("done"),
            Err(e) => eprintln!("{e}"),
        },
    );
}
