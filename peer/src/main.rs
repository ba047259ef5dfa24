use clap::Parser;
use log::{info, warn};
use peer::device::Device;
use peer::rendering::{RenderConfig, TextRenderer};
use session::loopback::LoopbackHub;
use session::{DeliveryMode, SessionConfig, SessionEvent};
use shared::{DeviceKind, GamePhase, GameplayEvent};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of handheld devices to simulate
    #[arg(short = 'p', long, default_value = "2")]
    players: usize,

    /// Leave out the head-mounted device
    #[arg(long)]
    no_headset: bool,

    /// Game mode to start
    #[arg(short = 'm', long, default_value = shared::DEFAULT_GAME_MODE)]
    game_mode: String,

    /// Add one more handheld after the game has started
    #[arg(short = 'l', long)]
    late_joiner: bool,

    /// Send gameplay events over the unreliable channel
    #[arg(short = 'u', long)]
    unreliable_gameplay: bool,

    /// Seconds to wait for each step before giving up
    #[arg(short = 't', long, default_value = "5")]
    timeout: u64,

    /// Print participant ids next to each seat
    #[arg(long)]
    show_ids: bool,

    /// Milliseconds to wait for session listeners before joining anyway
    #[arg(long, default_value = "2000")]
    readiness_timeout_ms: u64,
}

impl Args {
    fn config(&self, kind: DeviceKind) -> SessionConfig {
        let delivery = if self.unreliable_gameplay {
            DeliveryMode::Unreliable
        } else {
            DeliveryMode::Reliable
        };
        SessionConfig::new(kind)
            .with_default_game_mode(self.game_mode.clone())
            .with_gameplay_delivery(delivery)
            .with_readiness_timeout(Duration::from_millis(self.readiness_timeout_ms))
    }
}

fn render_all(devices: &[Device], show_ids: bool) {
    for device in devices {
        let renderer = TextRenderer::new(RenderConfig {
            device_name: device.name().to_string(),
            show_ids,
        });
        print!("{}", renderer.render(&device.snapshot()));
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let wait = Duration::from_secs(args.timeout);
    let hub = LoopbackHub::new();

    let mut devices = Vec::new();
    if !args.no_headset {
        devices.push(Device::spawn(&hub, "headset", args.config(DeviceKind::HeadMounted)));
    }
    for n in 1..=args.players {
        devices.push(Device::spawn(
            &hub,
            format!("handheld-{}", n),
            args.config(DeviceKind::Handheld),
        ));
    }
    if devices.is_empty() {
        return Err("nothing to simulate: no headset and zero handhelds".into());
    }

    info!("Simulating {} devices", devices.len());
    for device in &devices {
        device.handle().finish_loading();
    }

    devices[0].handle().start_activity().await?;
    for device in &devices {
        device.wait_for_players(devices.len(), wait).await?;
    }
    info!("{} participants joined", hub.active_participants().len());
    render_all(&devices, args.show_ids);

    info!("Starting game '{}'", args.game_mode);
    devices[0].handle().request_ready(true);
    devices[0].handle().request_start(args.game_mode.clone());
    for device in &devices {
        device.wait_for_phase(GamePhase::InGame, wait).await?;
    }
    render_all(&devices, args.show_ids);

    if args.late_joiner {
        let late = Device::spawn(&hub, "late-handheld", args.config(DeviceKind::Handheld));
        late.handle().finish_loading();
        devices.push(late);

        let total = devices.len();
        for device in &devices {
            device.wait_for_players(total, wait).await?;
        }
        let snapshot = devices[total - 1]
            .wait_for_phase(GamePhase::InGame, wait)
            .await?;
        info!("Late joiner caught up with mode '{}'", snapshot.game_mode);
        render_all(&devices, args.show_ids);
    }

    let heart = GameplayEvent::new("heart", vec![1]);
    devices[0].handle().send_gameplay_event(heart);
    for device in devices.iter_mut().skip(1) {
        match device.next_gameplay_event(wait).await {
            Some(SessionEvent::Gameplay { sender, event, .. }) => {
                info!("{} got '{}' from {}", device.name(), event.kind, sender);
            }
            _ => warn!("{} missed the gameplay event", device.name()),
        }
    }

    info!("Ending the shared activity");
    hub.invalidate();
    for device in &devices {
        device.wait_for_phase(GamePhase::MainMenu, wait).await?;
    }
    render_all(&devices, args.show_ids);

    for device in &devices {
        device.handle().shutdown();
    }

    Ok(())
}
