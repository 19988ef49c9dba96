use client_core::{presentation::Tone, LogEntry, PresentationSink, View};
use tokio::sync::watch;

/// Prints log entries and status changes to stdout.
pub struct TerminalSink {
    push_link: watch::Sender<bool>,
    last_label: Option<&'static str>,
    last_progress: u8,
}

impl TerminalSink {
    /// The receiver reports whether the push channel is currently connected.
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (push_link, rx) = watch::channel(false);
        let sink = Self {
            push_link,
            last_label: None,
            last_progress: 0,
        };
        (sink, rx)
    }
}

pub fn render_entry(entry: &LogEntry) -> String {
    format!("[{:>7}] {}", entry.severity, entry.text.trim_end())
}

pub fn render_view(view: &View) -> String {
    if view.tone == Tone::Busy && view.progress > 0 {
        format!("== {}: {} (~{}%)", view.label, view.description, view.progress)
    } else {
        format!("== {}: {}", view.label, view.description)
    }
}

impl PresentationSink for TerminalSink {
    fn present(&mut self, view: &View) {
        self.push_link.send_replace(view.push_connected);
        if self.last_label == Some(view.label) && self.last_progress == view.progress {
            return;
        }
        self.last_label = Some(view.label);
        self.last_progress = view.progress;
        println!("{}", render_view(view));
    }

    fn append(&mut self, entry: &LogEntry) {
        println!("{}", render_entry(entry));
    }

    fn cleared(&mut self) {
        println!("-- log cleared --");
    }
}

#[cfg(test)]
mod tests {
    use client_core::{presentation::Controls, Severity};

    use super::*;

    fn view(tone: Tone, progress: u8) -> View {
        View {
            label: "Operation in progress",
            description: "Running operation...",
            tone,
            progress,
            controls: Controls {
                upload: false,
                erase: false,
                read_fuses: false,
                write_fuses: false,
                stop: true,
            },
            push_connected: true,
        }
    }

    #[test]
    fn entries_are_tagged_with_padded_severity() {
        assert_eq!(
            render_entry(&LogEntry::info("avrdude: reading input file\n")),
            "[   info] avrdude: reading input file"
        );
        assert_eq!(
            render_entry(&LogEntry::new(Severity::Success, "done")),
            "[success] done"
        );
    }

    #[test]
    fn busy_views_show_progress() {
        assert_eq!(
            render_view(&view(Tone::Busy, 60)),
            "== Operation in progress: Running operation... (~60%)"
        );
        assert_eq!(
            render_view(&view(Tone::Busy, 0)),
            "== Operation in progress: Running operation..."
        );
    }

    #[test]
    fn present_publishes_push_connectivity() {
        let (mut sink, rx) = TerminalSink::new();
        sink.present(&view(Tone::Busy, 0));
        assert!(*rx.borrow());
    }
}
