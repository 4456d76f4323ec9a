use kdam::term::Colorizer;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

static LOGGER: Logger = Logger;

pub struct Logger;

impl Logger {
    pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_logger(&LOGGER)?;
        log::set_max_level(level);
        Ok(())
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        match log::max_level() {
            LevelFilter::Off => (),
            LevelFilter::Error | LevelFilter::Warn | LevelFilter::Info => match record.level() {
                Level::Info => eprintln!("{}", record.args()),
                _ => eprintln!("{} {}", label(record.level()), record.args()),
            },
            LevelFilter::Debug | LevelFilter::Trace => {
                let location = match (record.file(), record.line()) {
                    (Some(file), Some(line)) => format!("[{file}:{line}]"),
                    _ => "[unk]".to_owned(),
                };

                eprintln!(
                    "{} {} {} {}",
                    label(record.level()),
                    record.target().colorize("cyan"),
                    location.colorize("cyan"),
                    record.args()
                );
            }
        }
    }

    fn flush(&self) {}
}

fn label(level: Level) -> String {
    match level {
        Level::Debug => "[DEBUG]".colorize("bold blue"),
        Level::Error => "[ERROR]".colorize("bold red"),
        Level::Info => "[INFO]".colorize("bold green"),
        Level::Trace => "[TRACE]".colorize("bold cyan"),
        Level::Warn => "[WARN]".colorize("bold yellow"),
    }
}
