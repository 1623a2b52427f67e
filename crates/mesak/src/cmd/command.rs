use mesak_driver::{Driver, DriverConfig, PortMap};

use crate::cmd::{parse_duration, CommandArgs};
use crate::exit::{driver_error, CliResult, COMMAND_REJECTED, SUCCESS};
use crate::output::{print_response, OutputFormat};

pub fn run(args: CommandArgs, format: OutputFormat, mut config: DriverConfig) -> CliResult<i32> {
    config.session.command_timeout = parse_duration(&args.timeout)?;
    // Commands only: no data receivers.
    config.ports = PortMap::command_only(args.port.unwrap_or(config.ports.command));

    let driver = Driver::new(config).map_err(|err| driver_error("invalid configuration", err))?;
    driver
        .connect(&args.host)
        .map_err(|err| driver_error("connect failed", err))?;
    tracing::info!(
        host = %args.host,
        identity = driver.device_identity().as_deref().unwrap_or(""),
        "connected"
    );

    let mut code = SUCCESS;
    for command in &args.commands {
        let response = driver
            .send_command(command)
            .map_err(|err| driver_error("command failed", err))?;
        print_response(command, &response, format);
        if !response.ok {
            code = COMMAND_REJECTED;
            if !args.keep_going {
                break;
            }
        }
    }

    driver
        .disconnect()
        .map_err(|err| driver_error("disconnect failed", err))?;
    Ok(code)
}
