//! Drives `ProcessDriver` end to end: fork a real source and a real
//! sink as separate processes, run them over the actual pipes, and
//! check the result once both have exited.
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;

use rustradio::block::{Block, BlockName, BlockRet};
use rustradio::blocks::{VectorSource, REAL};
use rustradio::composite::Composite;
use rustradio::error::Result;
use rustradio::port::{InputPort, PortSpec, ReadStatus, TypeSignature};
use rustradio::process::ProcessDriver;

/// Reads real-valued samples until EOF and appends their raw bytes to
/// a file on disk, so a process-mode test can observe a forked child's
/// output after the fact (an in-memory `Arc<Mutex<_>>`, as the other
/// reference sinks use, diverges across `fork()` and would only ever
/// show the parent's own empty copy). The file is opened in
/// `initialize`, which runs before any fork, and its fd is reported
/// through `files()` so the process driver's fd sweep keeps it open
/// for this block's child.
struct FileSink {
    sigs: Vec<TypeSignature>,
    chosen: Option<usize>,
    input: Vec<InputPort>,
    path: PathBuf,
    file: Option<File>,
    fds: Vec<RawFd>,
}

impl FileSink {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            sigs: vec![TypeSignature::new(vec![PortSpec::new("in", REAL)], vec![])],
            chosen: None,
            input: vec![InputPort::new("in")],
            path: path.into(),
            file: None,
            fds: Vec::new(),
        }
    }
}

impl BlockName for FileSink {
    fn block_name(&self) -> &str {
        "FileSink"
    }
}

impl Block for FileSink {
    fn type_signatures(&self) -> &[TypeSignature] {
        &self.sigs
    }
    fn differentiated_signature(&self) -> Option<usize> {
        self.chosen
    }
    fn set_differentiated_signature_index(&mut self, index: usize) {
        self.chosen = Some(index);
    }
    fn rate(&self) -> f64 {
        self.input[0].resolved_rate().unwrap_or(0.0)
    }
    fn initialize(&mut self) -> Result<()> {
        let file = File::create(&self.path).expect("create sink file");
        self.fds = vec![file.as_raw_fd()];
        self.file = Some(file);
        Ok(())
    }
    fn run_once(&mut self) -> Result<BlockRet> {
        match self.input[0].read()? {
            ReadStatus::Data(bytes) => {
                self.file
                    .as_mut()
                    .expect("initialize ran before run_once")
                    .write_all(&bytes)
                    .expect("write sink file");
                Ok(BlockRet::Produced)
            }
            ReadStatus::Idle => Ok(BlockRet::Idle),
            ReadStatus::Eof => Ok(BlockRet::Eof),
        }
    }
    fn files(&self) -> &[RawFd] {
        &self.fds
    }
    fn input_ports(&self) -> &[InputPort] {
        &self.input
    }
    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.input
    }
    fn output_ports(&self) -> &[rustradio::port::OutputPort] {
        &[]
    }
    fn output_ports_mut(&mut self) -> &mut [rustradio::port::OutputPort] {
        &mut []
    }
}

fn decode_real(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().expect("4 bytes")))
        .collect()
}

#[test]
fn process_driver_runs_source_to_sink_and_exits_cleanly() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!(
        "rustradio-process-driver-test-{}-{}.bin",
        std::process::id(),
        "source-to-sink"
    ));
    let _ = std::fs::remove_file(&path);

    let mut g = Composite::new("process_driver_s1");
    let src = g.add(Box::new(VectorSource::new(vec![1.0, 2.0, 3.0]).with_rate(1.0)));
    let sink = g.add(Box::new(FileSink::new(&path)));
    g.connect(src, "out", sink, "in")?;

    let mut driver = ProcessDriver::new(&mut g)?;
    driver.start(&mut g)?;
    driver.wait()?;

    for (_, status) in driver.status() {
        assert!(matches!(status, rustradio::process::BlockStatus::Exited(0)));
    }

    let mut bytes = Vec::new();
    File::open(&path)?.read_to_end(&mut bytes)?;
    assert_eq!(decode_real(&bytes), vec![1.0, 2.0, 3.0]);

    let _ = std::fs::remove_file(&path);
    Ok(())
}

#[test]
fn process_driver_reports_nonzero_exit_as_block_runtime_error() {
    struct FailingSink {
        sigs: Vec<TypeSignature>,
        chosen: Option<usize>,
        input: Vec<InputPort>,
    }
    impl BlockName for FailingSink {
        fn block_name(&self) -> &str {
            "FailingSink"
        }
    }
    impl Block for FailingSink {
        fn type_signatures(&self) -> &[TypeSignature] {
            &self.sigs
        }
        fn differentiated_signature(&self) -> Option<usize> {
            self.chosen
        }
        fn set_differentiated_signature_index(&mut self, index: usize) {
            self.chosen = Some(index);
        }
        fn rate(&self) -> f64 {
            self.input[0].resolved_rate().unwrap_or(0.0)
        }
        fn run_once(&mut self) -> Result<BlockRet> {
            Err(rustradio::error::Error::BlockRuntime {
                block: "FailingSink".into(),
                detail: "deliberate failure".into(),
            })
        }
        fn input_ports(&self) -> &[InputPort] {
            &self.input
        }
        fn input_ports_mut(&mut self) -> &mut [InputPort] {
            &mut self.input
        }
        fn output_ports(&self) -> &[rustradio::port::OutputPort] {
            &[]
        }
        fn output_ports_mut(&mut self) -> &mut [rustradio::port::OutputPort] {
            &mut []
        }
    }

    let mut g = Composite::new("process_driver_failure");
    let src = g.add(Box::new(VectorSource::new(vec![1.0]).with_rate(1.0)));
    let sink = g.add(Box::new(FailingSink {
        sigs: vec![TypeSignature::new(vec![PortSpec::new("in", REAL)], vec![])],
        chosen: None,
        input: vec![InputPort::new("in")],
    }));
    g.connect(src, "out", sink, "in").unwrap();

    let mut driver = ProcessDriver::new(&mut g).unwrap();
    driver.start(&mut g).unwrap();
    let err = driver.wait().unwrap_err();
    assert!(matches!(err, rustradio::error::Error::BlockRuntime { .. }));
}
