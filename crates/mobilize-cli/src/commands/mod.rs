mod convert;
mod inspect;

/// Subcommands for mobilize.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Convert a checkpoint into a mobile bundle.
    Convert(convert::ConvertArgs),

    /// Load, verify and summarize a converted bundle.
    Inspect(inspect::InspectArgs),
}

impl Commands {
    /// Run the subcommand.
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            Commands::Convert(cmd) => cmd.run(),
            Commands::Inspect(cmd) => cmd.run(),
        }
    }
}
