use std::path::PathBuf;

use immich_syncd::config::SyncConfig;
use immich_syncd::daemon::{self, DaemonRuntime};
use immich_syncd::sync::history::{RunKind, RunOutcome};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Download,
    Upload,
    Probe,
    ScanDuplicates,
    ClearDuplicateCache,
    Reset,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    mode: CliMode,
    export_errors: Option<PathBuf>,
}

fn parse_cli<I>(args: I) -> anyhow::Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions {
        mode: CliMode::Run,
        export_errors: None,
    };
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        options.mode = match arg.as_str() {
            "--download" => CliMode::Download,
            "--upload" => CliMode::Upload,
            "--probe" => CliMode::Probe,
            "--scan-duplicates" => CliMode::ScanDuplicates,
            "--clear-duplicate-cache" => CliMode::ClearDuplicateCache,
            "--reset" => CliMode::Reset,
            "--help" | "-h" => CliMode::Help,
            "--export-errors" => {
                let Some(path) = args.next() else {
                    anyhow::bail!("--export-errors requires a path");
                };
                options.export_errors = Some(PathBuf::from(path));
                continue;
            }
            other => anyhow::bail!("unknown argument: {other}"),
        };
    }
    Ok(options)
}

fn print_usage() {
    println!("Usage: immich-syncd [MODE] [--export-errors <path>]");
    println!("  (no mode)                 Run the daemon: watch, pull periodically, until Ctrl-C");
    println!("  --download                Pull new assets once and exit");
    println!("  --upload                  Push new local files once and exit");
    println!("  --probe                   Check server connectivity and permissions");
    println!("  --scan-duplicates         Estimate duplicates in the upload folder");
    println!("  --clear-duplicate-cache   Forget cached server duplicate verdicts");
    println!("  --reset                   Forget all sync state");
    println!("  --export-errors <path>    Write the run error log after a one-shot run");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_env("IMMICH_SYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = parse_cli(std::env::args())?;
    if options.mode == CliMode::Help {
        print_usage();
        return Ok(());
    }

    let config = SyncConfig::from_env()?;
    match options.mode {
        CliMode::Help => Ok(()),
        CliMode::ClearDuplicateCache => {
            daemon::clear_duplicate_cache(&config).await?;
            println!("duplicate cache cleared");
            Ok(())
        }
        CliMode::Reset => {
            daemon::reset_state(&config).await?;
            println!("sync state reset");
            Ok(())
        }
        CliMode::Run => {
            config.validate()?;
            DaemonRuntime::bootstrap(config).await?.run().await
        }
        CliMode::Probe => {
            let runtime = DaemonRuntime::bootstrap(config).await?;
            let report = runtime.probe().await;
            runtime.stop().await;
            println!("{}", report?);
            Ok(())
        }
        CliMode::ScanDuplicates => {
            let runtime = DaemonRuntime::bootstrap(config).await?;
            let report = runtime.scan_duplicates().await;
            runtime.stop().await;
            let report = report?;
            println!(
                "{} files scanned, about {} duplicates{}",
                report.files_scanned,
                report.duplicates,
                if report.truncated { " (scan truncated)" } else { "" }
            );
            Ok(())
        }
        CliMode::Download | CliMode::Upload => {
            let kind = if options.mode == CliMode::Download {
                RunKind::Download
            } else {
                RunKind::Upload
            };
            config.validate()?;
            let runtime = DaemonRuntime::bootstrap(config).await?;
            let result = runtime.run_once(kind).await;
            if let Some(path) = &options.export_errors {
                runtime.write_error_log(path).await?;
            }
            runtime.stop().await;
            let item = result?;
            println!(
                "{}: {} (downloaded {}, uploaded {}, skipped {}, errors {})",
                item.kind.as_str(),
                item.outcome.as_str(),
                item.downloaded,
                item.uploaded,
                item.skipped,
                item.errors
            );
            if item.outcome == RunOutcome::Failed {
                anyhow::bail!("{} run failed", kind.as_str());
            }
            Ok(())
        }
    }
}
