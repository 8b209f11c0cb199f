use anyhow::Result;
use bert_server::channel::{Collaborator, LogSender, TcpChannel};
use bert_server::message::sources;
use bert_server::motor::SimulatedMotor;
use bert_server::{system, DispatchCore, DispatcherHandle, MessageEnvelope, RobotConfig, ShutdownKind};
use bert_shared::Request;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("Usage: bert-server <config.toml>");
        return ExitCode::FAILURE;
    };

    let config = match RobotConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RobotConfig) -> Result<()> {
    info!("{} starting ({}cm tall, born {})", config.name, config.height_cm, config.birth_date);

    let motor = Arc::new(SimulatedMotor::with_default_joints());
    let mut core = DispatchCore::new(&config, motor);
    let handle = core.handle();

    handle.register_channel(sources::INTERNAL, Arc::new(LogSender)).await;

    let channels = [
        (sources::COMMAND, config.channels.command.as_deref()),
        (sources::TERMINAL, config.channels.terminal.as_deref()),
    ];
    for (source, addr) in channels {
        let Some(addr) = addr else {
            info!("{} channel disabled", source);
            continue;
        };
        let channel = TcpChannel::bind(source, addr, handle.clone()).await?;
        handle.register_channel(source, channel.clone()).await;
        core.add_collaborator(channel as Arc<dyn Collaborator>);
    }

    for timer in &config.timers {
        let request = Request::metric(&timer.metric)
            .with_delay_ms(timer.delay_ms)
            .repeating_every_ms(timer.interval_ms);
        info!("Reporting {} every {}ms", timer.metric, timer.interval_ms);
        handle.handle_request(MessageEnvelope::from_request(request, sources::INTERNAL))?;
    }

    tokio::spawn(halt_on_ctrl_c(handle));

    match core.run().await {
        ShutdownKind::Halt => info!("Halted"),
        ShutdownKind::PowerOff => system::request_power_off(&config.system.power_off_command).await?,
    }
    Ok(())
}

async fn halt_on_ctrl_c(handle: DispatcherHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        return;
    }
    info!("Ctrl-C received, halting");
    if let Err(e) = handle.request_shutdown(ShutdownKind::Halt) {
        warn!("{}", e);
    }
}
