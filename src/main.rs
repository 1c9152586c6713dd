//! sandrun CLI binary entry point.

use sandrun::cli::{commands, Cli, Commands};
use sandrun::error::RecoverySuggestion;
use sandrun::util::logging::{init_logging, LogFormat};

#[tokio::main]
async fn main() {
    init_logging(LogFormat::from_env());
    let cli = Cli::parse_args();

    let result = match cli.command {
        Commands::Serve(args) => commands::handle_serve(args).await,
        Commands::Chat(args) => commands::handle_chat(args).await,
        Commands::Check(args) => commands::handle_check(args),
        Commands::Tools => commands::handle_tools(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        match e.recovery_suggestion() {
            RecoverySuggestion::CheckCredentials => {
                eprintln!("hint: check OPENAI_API_KEY, SANDRUN_TOKEN, or SANDRUN_AUTH_TOKENS")
            }
            RecoverySuggestion::CheckConfiguration => {
                eprintln!("hint: check the config file ($SANDRUN_CONFIG) and SANDRUN_* variables")
            }
            _ => {}
        }
        std::process::exit(1);
    }
}
