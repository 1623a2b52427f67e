use mesak_driver::Replay;

use crate::cmd::{selected_categories, ReplayArgs};
use crate::exit::{driver_error, CliResult, SUCCESS};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: ReplayArgs, format: OutputFormat) -> CliResult<i32> {
    let mut replay = Replay::open(&args.dir)
        .map_err(|err| driver_error(&format!("cannot open {}", args.dir.display()), err))?;

    let mut printed = 0usize;
    for category in selected_categories(args.categories.as_deref()) {
        for _ in 0..args.skip {
            if !replay
                .seek(category)
                .map_err(|err| driver_error("replay failed", err))?
            {
                break;
            }
        }

        while let Some(packet) = replay
            .get_data(category)
            .map_err(|err| driver_error("replay failed", err))?
        {
            print_packet(&packet, args.records, format);
            printed = printed.saturating_add(1);
            if args.count.is_some_and(|count| printed >= count) {
                return Ok(SUCCESS);
            }
        }
    }

    if printed == 0 {
        tracing::warn!(dir = %args.dir.display(), "no packets in capture");
    }
    Ok(SUCCESS)
}
