use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Saved,
    Restored,
    Failed,
}

/// Receives a cue for every accepted backup, restore, and failure.
pub trait Feedback: Send {
    fn cue(&self, cue: Cue);
}

#[derive(Debug, Default)]
pub struct Silent;

impl Feedback for Silent {
    fn cue(&self, _cue: Cue) {}
}

/// Rings the terminal bell: once on success, twice on failure.
#[derive(Debug, Default)]
pub struct TerminalBell;

impl Feedback for TerminalBell {
    fn cue(&self, cue: Cue) {
        let bells = match cue {
            Cue::Saved | Cue::Restored => "\x07",
            Cue::Failed => "\x07\x07",
        };
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(bells.as_bytes());
        let _ = stderr.flush();
    }
}

pub fn from_settings(play_sounds: bool) -> Box<dyn Feedback> {
    if play_sounds {
        Box::new(TerminalBell)
    } else {
        Box::new(Silent)
    }
}
