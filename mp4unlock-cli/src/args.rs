use anyhow::Result;
use clap::{ArgAction, ColorChoice, Parser};
use log::LevelFilter;
use mp4unlock::{DecryptJob, ProgressBridge, progress};
use std::path::PathBuf;

/// Decrypt CENC, PIFF, OMA DCF and Marlin protected mp4 files.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path of the protected mp4 file.
    #[arg(required = true)]
    pub input: PathBuf,

    /// Path of the decrypted mp4 file, overwritten if it exists.
    #[arg(required = true)]
    pub output: PathBuf,

    /// Keys for decrypting the file, in hex format.
    /// ID is a KID for CENC and PIFF files or a track ID for OMA DCF and Marlin files.
    /// This option can be used multiple times.
    #[arg(short, long = "key", value_name = "ID:KEY;ID:KEY...", value_parser = keys_parser)]
    pub keys: Vec<KeyPairs>,

    /// Do not draw a progress bar.
    #[arg(long)]
    pub no_progress: bool,

    /// When to output colored text.
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Print more diagnostics, use twice for trace output.
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only print errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Error;
        }

        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn execute(self) -> Result<()> {
        let mut builder = DecryptJob::builder().input(self.input).output(self.output);

        for (id, key) in self.keys.iter().flat_map(|x| &x.0) {
            builder = builder.key_for(id, key)?;
        }

        if self.no_progress || self.quiet {
            // Ticks are dropped once the receiving half is gone.
            let (sender, _) = progress::channel();
            builder = builder.progress(ProgressBridge::Channel(sender));
        }

        builder.build().run()?;
        Ok(())
    }
}

/// `ID:KEY` pairs of one `--key` value.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPairs(Vec<(String, String)>);

fn keys_parser(s: &str) -> Result<KeyPairs, String> {
    let mut keys = Vec::new();

    for pair in s.split(';').filter(|x| !x.is_empty()) {
        let Some((id, key)) = pair.split_once(':') else {
            return Err(format!("expected ID:KEY, got '{pair}'."));
        };

        keys.push((
            id.replace('-', "").to_ascii_lowercase(),
            key.replace('-', "").to_ascii_lowercase(),
        ));
    }

    Ok(KeyPairs(keys))
}
