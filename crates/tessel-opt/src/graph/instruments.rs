use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tessel_ir::{FlowGraph, dump_graph};

use super::GraphPassInstrument;

/// Writes `dump_graph` snapshots into a directory:
/// `0_origin.txt`, then `<n>_<pass>.txt` after every pass.
#[derive(Debug)]
pub struct SaveGraphInstrument {
    dir: PathBuf,
    index: usize,
}

impl SaveGraphInstrument {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save(&self, file: &str, graph: &FlowGraph) {
        let path = self.dir.join(file);
        if let Err(e) = fs::write(&path, dump_graph(graph)) {
            log::warn!("cannot save graph snapshot {}: {e}", path.display());
        }
    }
}

impl GraphPassInstrument for SaveGraphInstrument {
    fn before_all_passes(&mut self, graph: &FlowGraph) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            log::warn!("cannot create {}: {e}", self.dir.display());
        }
        self.index = 0;
        self.save("0_origin.txt", graph);
    }

    fn after_pass(&mut self, pass: &str, graph: &FlowGraph) {
        self.index += 1;
        self.save(&format!("{}_{pass}.txt", self.index), graph);
    }
}

/// Measures wall time of every pass.
#[derive(Debug)]
pub struct ProfileInstrument {
    log_file: Option<PathBuf>,
    print_stdout: bool,
    start: Option<Instant>,
    times: Vec<(String, Duration)>,
}

impl ProfileInstrument {
    pub fn new(log_file: Option<PathBuf>, print_stdout: bool) -> Self {
        Self {
            log_file,
            print_stdout,
            start: None,
            times: Vec::new(),
        }
    }

    /// Pass names and durations of the last run, in pipeline order.
    pub fn times(&self) -> &[(String, Duration)] {
        &self.times
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        for (name, time) in &self.times {
            out.push_str(&format!("{name:<20} {:>10.3} ms\n", time.as_secs_f64() * 1e3));
        }
        out
    }
}

impl GraphPassInstrument for ProfileInstrument {
    fn before_all_passes(&mut self, _graph: &FlowGraph) {
        self.times.clear();
    }

    fn before_pass(&mut self, _pass: &str, _graph: &FlowGraph) {
        self.start = Some(Instant::now());
    }

    fn after_pass(&mut self, pass: &str, _graph: &FlowGraph) {
        if let Some(start) = self.start.take() {
            self.times.push((pass.to_string(), start.elapsed()));
        }
    }

    fn after_all_passes(&mut self, _graph: &FlowGraph) {
        let report = self.report();
        if let Some(path) = &self.log_file {
            if let Err(e) = fs::write(path, &report) {
                log::warn!("cannot write profile to {}: {e}", path.display());
            }
        }
        if self.print_stdout {
            print!("{report}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PassContext, optimize};
    use tessel_ir::{DataType, ops};

    fn graph() -> FlowGraph {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[4]);
        let y = ops::neg(&mut g, x).unwrap();
        let y = ops::sqrt(&mut g, y).unwrap();
        g.mark_output(y);
        g
    }

    #[test]
    fn snapshots_every_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = PassContext::new().save_graphs(dir.path().join("graphs"));
        optimize(graph(), &mut ctx).unwrap();
        let mut files: Vec<String> = fs::read_dir(dir.path().join("graphs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(
            files,
            [
                "0_origin.txt",
                "1_const_fold.txt",
                "2_pattern_transform.txt",
                "3_fuse_unary.txt",
                "4_fuse_epilogue.txt",
                "5_fuse_prologue.txt",
            ]
        );
        let origin = fs::read_to_string(dir.path().join("graphs/0_origin.txt")).unwrap();
        assert!(origin.contains("t1 = neg(t0)"));
        let fused = fs::read_to_string(dir.path().join("graphs/3_fuse_unary.txt")).unwrap();
        assert!(fused.contains("= fused_neg_sqrt(t0)"));
    }

    #[test]
    fn profile_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("profile.txt");
        let mut ctx = PassContext::new().profile(Some(log.clone()), false);
        optimize(graph(), &mut ctx).unwrap();
        let text = fs::read_to_string(log).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.starts_with("const_fold"));
    }

    #[test]
    fn unwritable_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let mut ctx = PassContext::new().save_graphs(blocker.join("graphs"));
        assert!(optimize(graph(), &mut ctx).is_ok());
    }
}
