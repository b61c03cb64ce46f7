//! Textual graph dumps for debugging the pipeline.
//!
//! A dump is taken after graph building, SSA construction, every
//! optimization, liveness analysis and register allocation of each method
//! whose name matches the filter. Dumps are advisory: failing to open or
//! write the sink is logged and otherwise ignored.

use std::{
    fmt::Display,
    fs::File,
    io::{BufWriter, Write},
    sync::Mutex,
};

use tracing::debug;

use crate::{
    driver::{VisualizerOptions, VisualizerOutput},
    Result,
};

enum Sink {
    Disabled,
    Memory(boxcar::Vec<String>),
    File(Mutex<BufWriter<File>>),
}

/// Destination of graph dumps, shared by all compilations of a compiler.
pub struct Visualizer {
    filter: String,
    sink: Sink,
}

impl Visualizer {
    /// Creates the sink described by `options`; `None` disables dumping.
    ///
    /// A file that can not be created disables dumping.
    #[must_use]
    pub fn new(options: Option<&VisualizerOptions>) -> Self {
        let Some(options) = options else {
            return Self::disabled();
        };
        let sink = match &options.output {
            VisualizerOutput::Memory => Sink::Memory(boxcar::Vec::new()),
            VisualizerOutput::File(path) => match File::create(path) {
                Ok(file) => Sink::File(Mutex::new(BufWriter::new(file))),
                Err(error) => {
                    debug!("graph dumps disabled, can not create {}: {error}", path.display());
                    Sink::Disabled
                }
            },
        };
        Self {
            filter: options.filter.clone(),
            sink,
        }
    }

    /// A visualizer that never dumps.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            filter: String::new(),
            sink: Sink::Disabled,
        }
    }

    /// `true` if methods named `method` are dumped.
    #[must_use]
    pub fn is_enabled_for(&self, method: &str) -> bool {
        !matches!(self.sink, Sink::Disabled) && method.contains(self.filter.as_str())
    }

    /// Records `content` as the state of `method` after `pass`.
    pub fn dump(&self, method: &str, pass: &str, content: &dyn Display) {
        if !self.is_enabled_for(method) {
            return;
        }
        let text = format!("begin_compilation\n  method \"{method}\"\n  pass \"{pass}\"\n{content}end_compilation\n");
        if let Err(error) = self.write(text) {
            debug!("dropped graph dump of {method} after {pass}: {error}");
        }
    }

    fn write(&self, text: String) -> Result<()> {
        match &self.sink {
            Sink::Disabled => {}
            Sink::Memory(dumps) => {
                dumps.push(text);
            }
            Sink::File(writer) => {
                let mut writer = lock!(writer)?;
                writer.write_all(text.as_bytes())?;
                writer.flush()?;
            }
        }
        Ok(())
    }

    /// Dumps kept in memory, in the order they were taken. Empty for other
    /// sinks.
    #[must_use]
    pub fn dumps(&self) -> Vec<String> {
        match &self.sink {
            Sink::Memory(dumps) => dumps.iter().map(|(_, dump)| dump.clone()).collect(),
            Sink::Disabled | Sink::File(_) => Vec::new(),
        }
    }
}

impl std::fmt::Debug for Visualizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match self.sink {
            Sink::Disabled => "disabled",
            Sink::Memory(_) => "memory",
            Sink::File(_) => "file",
        };
        f.debug_struct("Visualizer")
            .field("filter", &self.filter)
            .field("sink", &sink)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_selects_methods_by_substring() {
        let visualizer = Visualizer::new(Some(&VisualizerOptions::in_memory("Loop")));
        visualizer.dump("Main.countLoop", "ssa", &"graph\n");
        visualizer.dump("Main.add", "ssa", &"graph\n");

        let dumps = visualizer.dumps();
        assert_eq!(dumps.len(), 1);
        assert!(dumps[0].contains("method \"Main.countLoop\""));
        assert!(dumps[0].contains("pass \"ssa\""));
    }

    #[test]
    fn disabled_visualizer_matches_nothing() {
        let visualizer = Visualizer::new(None);
        assert!(!visualizer.is_enabled_for("Main.add"));
        visualizer.dump("Main.add", "builder", &"graph\n");
        assert!(visualizer.dumps().is_empty());
    }

    #[test]
    fn unopenable_file_is_tolerated() {
        let options = VisualizerOptions::to_file("", "/nonexistent-directory/dumps.cfg");
        let visualizer = Visualizer::new(Some(&options));
        assert!(!visualizer.is_enabled_for("Main.add"));
        visualizer.dump("Main.add", "builder", &"graph\n");
    }
}
