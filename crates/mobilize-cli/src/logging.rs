use stderrlog::{LogLevelNum, Timestamp};

/// Logging flags shared by every subcommand.
#[derive(clap::Args, Debug)]
pub struct LogArgs {
    /// Silence log messages.
    #[clap(short, long)]
    pub quiet: bool,

    /// Raise the log level; each `-v` adds one step above warnings.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Prefix log lines with a timestamp.
    #[clap(long)]
    pub ts: bool,
}

impl LogArgs {
    /// The level for a subcommand whose quiet default is `default`.
    ///
    /// `-v` counts up from warnings, so a command that logs progress by
    /// default still reaches debug output with `-vv`.
    pub fn level(
        &self,
        default: u8,
    ) -> LogLevelNum {
        let level = match self.verbose {
            0 => default,
            verbose => default.max(2).saturating_add(verbose),
        };
        match level {
            0 => LogLevelNum::Off,
            1 => LogLevelNum::Error,
            2 => LogLevelNum::Warn,
            3 => LogLevelNum::Info,
            4 => LogLevelNum::Debug,
            _ => LogLevelNum::Trace,
        }
    }

    /// Install the `stderrlog` logger.
    pub fn setup_logging(
        &self,
        default: u8,
    ) -> Result<(), Box<dyn std::error::Error>> {
        stderrlog::new()
            .quiet(self.quiet)
            .verbosity(self.level(default))
            .timestamp(if self.ts {
                Timestamp::Second
            } else {
                Timestamp::Off
            })
            .init()?;

        Ok(())
    }
}
