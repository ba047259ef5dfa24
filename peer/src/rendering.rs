use session::SessionSnapshot;
use shared::Player;
use std::fmt;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatColor {
    Red,
    Blue,
    Purple,
    Yellow,
    Black,
}

impl fmt::Display for SeatColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SeatColor::Red => "red",
            SeatColor::Blue => "blue",
            SeatColor::Purple => "purple",
            SeatColor::Yellow => "yellow",
            SeatColor::Black => "black",
        };
        f.pad(name)
    }
}

pub fn seat_color(seat: u32) -> SeatColor {
    match seat {
        1 => SeatColor::Red,
        2 => SeatColor::Blue,
        3 => SeatColor::Purple,
        4 => SeatColor::Yellow,
        _ => SeatColor::Black,
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub device_name: String,
    pub show_ids: bool,
}

/// Draws a session snapshot as plain text, one line per seat.
pub struct TextRenderer {
    config: RenderConfig,
}

impl TextRenderer {
    pub fn new(config: RenderConfig) -> Self {
        TextRenderer { config }
    }

    pub fn render(&self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();
        self.draw_header(&mut out, snapshot);

        if snapshot.players.is_empty() {
            out.push_str("  (no players)\n");
        }
        for player in &snapshot.players {
            self.draw_player(&mut out, player);
        }
        out
    }

    fn draw_header(&self, out: &mut String, snapshot: &SessionSnapshot) {
        let _ = writeln!(
            out,
            "== {} | {} | mode {} ==",
            self.config.device_name, snapshot.phase, snapshot.game_mode
        );
    }

    fn draw_player(&self, out: &mut String, player: &Player) {
        let _ = write!(
            out,
            "  seat {} [{:<6}] {:<10} score {:>4}",
            player.seat,
            seat_color(player.seat),
            player.name,
            player.score
        );
        if player.is_local_device {
            out.push_str("  (this device)");
        }
        if self.config.show_ids {
            let _ = write!(out, "  {}", player.id);
        }
        out.push('\n');
    }
}
