use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gamecafe_core::Config;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "gamecafe", version, about = "Gaming-cafe quota timer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Quota Store HTTP server
    Serve(commands::serve::ServeArgs),
    /// Manage quota accounts in the local ledger
    Account {
        #[command(subcommand)]
        action: commands::account::AccountAction,
    },
    /// Issue bearer tokens
    Token {
        #[command(subcommand)]
        action: commands::token::TokenAction,
    },
    /// Save credentials for the remote store
    Login(commands::login::LoginArgs),
    /// Forget saved credentials
    Logout,
    /// Inspect or top up the current user's quota
    Quota {
        #[command(subcommand)]
        action: commands::quota::QuotaAction,
    },
    /// Interactive gaming session
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Print shell completions
    Completions { shell: Shell },
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "gamecafe", &mut std::io::stdout());
        return;
    }

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging.filter);

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(args, &config).await,
        Commands::Account { action } => commands::account::run(action, &config),
        Commands::Token { action } => commands::token::run(action, &config),
        Commands::Login(args) => commands::login::login(args, &config).await,
        Commands::Logout => commands::login::logout(),
        Commands::Quota { action } => commands::quota::run(action, &config).await,
        Commands::Session { action } => commands::session::run(action, &config).await,
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { .. } => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
