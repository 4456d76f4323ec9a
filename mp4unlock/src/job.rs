//! One-shot decrypt task, from opening the files to the final outcome.

use crate::{
    Error, KeyMap, KeyMapBuilder, Result,
    error::DecryptError,
    processor::Processor,
    progress::{self, ProgressBridge, ProgressListener},
    scheme,
};
use log::{debug, error, info};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Cursor, Write},
    path::PathBuf,
    thread::{self, JoinHandle},
};

/// Life cycle of a [`DecryptJob`].
///
/// `Created → Opening → Detecting → Dispatched → Transforming → Succeeded`,
/// with `Failed` reachable from `Opening` and `Transforming`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Created,
    Opening,
    Detecting,
    Dispatched,
    Transforming,
    Succeeded,
    Failed,
}

/// Builder for creating [`DecryptJob`] instances.
///
/// # Example
///
/// ```no_run
/// use mp4unlock::DecryptJob;
///
/// DecryptJob::builder()
///     .input("encrypted.mp4")
///     .output("decrypted.mp4")
///     .key("eb676abbcb345e96bbcf616630f1a3da", "100b6c20940f779a4589152b57d2dacb")?
///     .build()
///     .run()?;
/// # Ok::<(), mp4unlock::Error>(())
/// ```
#[derive(Default)]
pub struct DecryptJobBuilder {
    input: PathBuf,
    output: PathBuf,
    keys: KeyMapBuilder,
    progress: Option<ProgressBridge>,
}

impl DecryptJobBuilder {
    pub fn input<T: Into<PathBuf>>(mut self, path: T) -> Self {
        self.input = path.into();
        self
    }

    pub fn output<T: Into<PathBuf>>(mut self, path: T) -> Self {
        self.output = path.into();
        self
    }

    /// Add a KID/key pair, both as 32 hex characters.
    pub fn key(mut self, kid: &str, key: &str) -> Result<Self> {
        self.keys = self.keys.key(kid, key)?;
        Ok(self)
    }

    /// Add every KID/key pair of `keys`.
    pub fn keys(mut self, keys: &HashMap<String, String>) -> Result<Self> {
        self.keys = self.keys.keys(keys)?;
        Ok(self)
    }

    /// Add a key for schemes that address keys by track ID.
    pub fn track_key(mut self, track_id: u32, key: &str) -> Result<Self> {
        self.keys = self.keys.track_key(track_id, key)?;
        Ok(self)
    }

    /// Add a key whose `id` is either a KID or a decimal track ID.
    pub fn key_for(mut self, id: &str, key: &str) -> Result<Self> {
        self.keys = self.keys.key_for(id, key)?;
        Ok(self)
    }

    /// Where progress ticks go. Defaults to the local progress bar.
    pub fn progress(mut self, progress: ProgressBridge) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> DecryptJob {
        DecryptJob {
            input: self.input,
            output: self.output,
            keys: self.keys.build(),
            progress: self.progress.unwrap_or_default(),
            state: JobState::Created,
        }
    }
}

/// Decrypts one file into another.
///
/// The job is consumed by [`DecryptJob::run`] or [`DecryptJob::spawn`]. Files
/// are closed on every exit path.
pub struct DecryptJob {
    input: PathBuf,
    output: PathBuf,
    keys: KeyMap,
    progress: ProgressBridge,
    state: JobState,
}

impl DecryptJob {
    pub fn builder() -> DecryptJobBuilder {
        DecryptJobBuilder::default()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Run the job on the current thread.
    pub fn run(mut self) -> Result<()> {
        let input = self.input.clone();

        match self.execute() {
            Ok(()) => {
                self.transition(JobState::Succeeded);
                info!("decrypted {}", input.display());
                Ok(())
            }
            Err(e) => {
                self.transition(JobState::Failed);
                error!("{e}");
                Err(e)
            }
        }
    }

    /// Run the job on a new worker thread.
    pub fn spawn(self) -> std::io::Result<JobHandle> {
        let handle = thread::Builder::new()
            .name("mp4unlock-job".to_owned())
            .spawn(move || self.run())?;

        Ok(JobHandle(handle))
    }

    fn execute(&mut self) -> Result<()> {
        self.transition(JobState::Opening);

        if self.input.as_os_str().is_empty() {
            return Err(Error::MissingInput);
        }

        if self.output.as_os_str().is_empty() {
            return Err(Error::MissingOutput);
        }

        let mut input = File::open(&self.input)
            .map(BufReader::new)
            .map_err(|source| Error::CannotOpenInput {
                path: self.input.clone(),
                source,
            })?;

        let mut output = File::create(&self.output)
            .map(BufWriter::new)
            .map_err(|source| Error::CannotOpenOutput {
                path: self.output.clone(),
                source,
            })?;

        self.transition(JobState::Detecting);
        let scheme = scheme::detect(&mut input);
        debug!("{} is protected with {scheme}", self.input.display());

        self.transition(JobState::Dispatched);
        let processor = Processor::new(scheme, std::mem::take(&mut self.keys));

        // Rewinds the input after detection.
        self.transition(JobState::Transforming);
        processor.process(&mut input, &mut output, &mut self.progress)?;
        output.flush().map_err(DecryptError::from)?;
        Ok(())
    }

    fn transition(&mut self, state: JobState) {
        debug!("job state {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Handle of a job running on a worker thread.
pub struct JobHandle(JoinHandle<Result<()>>);

impl JobHandle {
    /// Wait for the job to finish.
    pub fn join(self) -> Result<()> {
        self.0
            .join()
            .unwrap_or(Err(Error::Transform(DecryptError::WorkerPanicked)))
    }
}

/// Files and keys of a job started with [`decrypt_file`].
#[derive(Clone, Debug, Default)]
pub struct DecryptRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// KID to key, both as 32 hex characters.
    pub keys: HashMap<String, String>,
}

/// Decrypt `request.input` into `request.output` on a worker thread.
///
/// `progress` receives every tick on the calling thread. Without it the
/// local progress bar is used. `completion` is called exactly once, on the
/// calling thread, with the outcome.
pub fn decrypt_file<P, C>(request: DecryptRequest, progress: Option<P>, completion: C)
where
    P: FnMut(u32, u32),
    C: FnOnce(Result<()>),
{
    completion(run_request(request, progress));
}

fn run_request<P: FnMut(u32, u32)>(request: DecryptRequest, progress: Option<P>) -> Result<()> {
    let mut builder = DecryptJob::builder()
        .input(request.input)
        .output(request.output)
        .keys(&request.keys)
        .inspect_err(|e| error!("{e}"))?;

    let events = match progress {
        Some(_) => {
            let (sender, events) = progress::channel();
            builder = builder.progress(ProgressBridge::Channel(sender));
            Some(events)
        }
        None => None,
    };

    let handle = builder
        .build()
        .spawn()
        .map_err(|e| Error::Transform(DecryptError::Io(e)))
        .inspect_err(|e| error!("{e}"))?;

    // Ends once the worker drops its sender.
    if let (Some(events), Some(callback)) = (events, progress) {
        events.dispatch(callback);
    }

    handle.join()
}

/// Decrypt a whole file held in memory, on the current thread.
///
/// # Example
///
/// ```no_run
/// use mp4unlock::KeyMap;
///
/// let keys = KeyMap::builder()
///     .key("eb676abbcb345e96bbcf616630f1a3da", "100b6c20940f779a4589152b57d2dacb")?
///     .build();
///
/// let encrypted = std::fs::read("encrypted.mp4").unwrap();
/// let decrypted = mp4unlock::decrypt(&encrypted, &keys, &mut |_: u32, _: u32| ())?;
/// # Ok::<(), mp4unlock::Error>(())
/// ```
pub fn decrypt(
    data: &[u8],
    keys: &KeyMap,
    progress: &mut dyn ProgressListener,
) -> Result<Vec<u8>> {
    let mut input = Cursor::new(data);
    let scheme = scheme::detect(&mut input);
    debug!("{} bytes protected with {scheme}", data.len());

    let mut output = Cursor::new(Vec::with_capacity(data.len()));

    Processor::new(scheme, keys.clone())
        .process(&mut input, &mut output, progress)
        .map_err(Error::from)
        .inspect_err(|e| error!("{e}"))?;

    Ok(output.into_inner())
}
