/// Initialise `env_logger`. `RUST_LOG` still wins over the default filter.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

/// Collapses runs of identical lines from chatty external tools.
///
/// The first occurrence of a line is passed through; repeats are counted
/// and summarised once a different line arrives (or on `flush`).
#[derive(Debug, Default)]
pub struct RepeatFilter {
    last: Option<String>,
    repeats: u32,
}

impl RepeatFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line. Returns the lines that should be logged now.
    pub fn push(&mut self, line: &str) -> Vec<String> {
        if self.last.as_deref() == Some(line) {
            self.repeats += 1;
            return Vec::new();
        }
        let mut out = self.flush();
        self.last = Some(line.to_string());
        out.push(line.to_string());
        out
    }

    /// Emit the pending repeat summary, if any.
    pub fn flush(&mut self) -> Vec<String> {
        if self.repeats == 0 {
            return Vec::new();
        }
        let n = std::mem::take(&mut self.repeats);
        vec![format!("    Last message repeated {n} times")]
    }
}
