mod cli;
mod commands;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};

use cibox::CiboxError;
use cibox::runtime::constants::exit_codes;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cibox::init_logging(cli.global.verbosity());

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            let kind = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<CiboxError>())
                .map_or("Error", CiboxError::kind);
            eprintln!("{kind}: {e:#}");
            exit_codes::SETUP_FAILURE
        }
    };
    std::process::exit(code);
}

/// Run the subcommand; the result is the process exit code.
async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let global = cli.global;
    match cli.command {
        Commands::Run(args) => commands::run::execute(args, &global).await,
        Commands::List(args) => commands::list::execute(args, &global).await,
        Commands::Inspect(args) => commands::inspect::execute(args, &global).await,
        Commands::Destroy(args) => commands::destroy::execute(args, &global).await,
        Commands::Bases => commands::bases::execute(&global).await,
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            cli::generate_completion(&args.shell, &mut cmd, "cibox", &mut std::io::stdout());
            Ok(0)
        }
    }
}
