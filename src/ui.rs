use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Live,
}

impl UiMode {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag {
            Some("plain") => UiMode::Plain,
            Some("live") => UiMode::Live,
            _ => UiMode::Auto,
        }
    }
}

/// Single live-updating reading line on a TTY, plain stderr lines otherwise.
pub struct ReadingLine {
    bar: Option<ProgressBar>,
}

impl ReadingLine {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let live = match mode {
            UiMode::Live => true,
            UiMode::Plain => false,
            UiMode::Auto => is_tty,
        };
        if live {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            Self { bar: Some(bar) }
        } else {
            Self { bar: None }
        }
    }

    pub fn update(&self, message: String) {
        match &self.bar {
            Some(bar) => bar.set_message(message),
            None => eprintln!("{}", message),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
