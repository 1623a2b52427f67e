use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mesak_driver::{Archive, DirArchive, Driver, DriverConfig, DriverError};
use mesak_frame::Category;

use crate::cmd::{parse_duration, selected_categories, CaptureArgs};
use crate::exit::{driver_error, CliError, CliResult, SUCCESS};
use crate::output::{print_packet, print_stats, OutputFormat};

const IDLE_WAIT: Duration = Duration::from_millis(20);

pub fn run(args: CaptureArgs, format: OutputFormat, mut config: DriverConfig) -> CliResult<i32> {
    let deadline = match &args.duration {
        Some(duration) => Some(Instant::now() + parse_duration(duration)?),
        None => None,
    };
    let categories = selected_categories(args.categories.as_deref());
    for category in Category::ALL {
        if !categories.contains(&category) {
            config.ports.set_data_port(category, None);
        }
    }
    if let Some(port) = args.port {
        config.ports.command = port;
    }
    config.collect = !args.no_collect;

    let driver = Driver::new(config).map_err(|err| driver_error("invalid configuration", err))?;
    if let Some(dir) = &args.save {
        let archive = DirArchive::create(dir)
            .map_err(|err| driver_error(&format!("cannot create {}", dir.display()), err))?;
        let archive: Arc<dyn Archive> = Arc::new(archive);
        driver.set_archive(Some(archive));
        for &category in &categories {
            driver.set_save(category, true);
        }
        tracing::info!(dir = %dir.display(), "saving packets");
    }

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    driver
        .connect(&args.host)
        .map_err(|err| driver_error("connect failed", err))?;
    tracing::info!(host = %args.host, categories = ?categories, "capturing");

    let mut printed = 0usize;
    'capture: while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        let mut idle = true;
        for &category in &categories {
            match driver.get_data(category) {
                Ok(packet) => {
                    idle = false;
                    print_packet(&packet, args.records, format);
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        break 'capture;
                    }
                }
                Err(DriverError::BufferEmpty(_)) => {}
                Err(err) => return Err(driver_error("capture failed", err)),
            }
        }
        if idle {
            std::thread::sleep(IDLE_WAIT);
        }
    }

    driver
        .disconnect()
        .map_err(|err| driver_error("disconnect failed", err))?;

    let rows: Vec<_> = categories
        .iter()
        .map(|&category| (category, driver.stats(category)))
        .collect();
    for (category, stats) in &rows {
        tracing::info!(
            category = %category,
            received = stats.received,
            malformed = stats.malformed,
            saved = stats.saved,
            "capture finished"
        );
    }
    if args.stats {
        print_stats(&rows, format);
    }
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
