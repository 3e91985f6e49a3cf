use countersign::application_port::*;
use countersign::logger::*;
use countersign::server::*;
use countersign::settings::*;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logger = Logger::new_bootstrap();

    let project_settings = parse_settings(cli.settings.as_deref())?;
    info!(?project_settings);
    logger.reload_from_config(&LogConfig::from(&project_settings.log))?;

    let server = Server::try_new(&project_settings).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });
    let ctx = RequestContext::new(cancel);

    let result = run(&server, &ctx, cli.command).await;
    server.shutdown().await;
    result
}

async fn run(server: &Server, ctx: &RequestContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::RevokeUser { user_id } => {
            let revoked = server.auth_service.revoke_all_sessions(ctx, user_id).await?;
            println!("revoked {revoked} refresh token(s) for {user_id}");
        }
        Command::Cleanup { retention_days } => {
            let retention = retention_days
                .map(|days| Duration::from_secs(u64::from(days) * SECS_PER_DAY))
                .unwrap_or_else(|| server.retention());
            let report = server.auth_service.cleanup(ctx, retention).await?;
            println!(
                "removed {} denylist entr(y/ies), {} token record(s)",
                report.denylist_entries, report.token_records
            );
        }
        Command::Inspect { token } => match server.token_codec.verify(&token).await {
            Ok(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
            Err(e) => {
                let expiry = server.token_codec.expiry_of(&token);
                warn!(error = %e, "token did not verify");
                match expiry {
                    Ok(exp) => println!("invalid: {e} (exp {exp})"),
                    Err(_) => println!("invalid: {e}"),
                }
            }
        },
    }
    Ok(())
}
