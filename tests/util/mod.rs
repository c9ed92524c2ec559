#![allow(dead_code)]

use std::{
    io::{Error, ErrorKind, Result},
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pl2303::{
    line::SET_LINE_CODING_REQUEST, BulkWorker, ControlRequest, Data, Direction, EndpointInfo, TransferType,
    UsbConnection,
};

pub fn init_log() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer().with_test_writer()).with(EnvFilter::from_default_env()).init();
        tracing_log::LogTracer::init().unwrap();
    });
}

/// Something that happened on the mock device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Claim(u8),
    Release(u8),
    /// Control transfer with the data sent, or the requested length for reads.
    Control { request: ControlRequest, sent: Vec<u8>, read_len: usize },
    Endpoint(&'static str, u8),
    Start(&'static str),
    Stop(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn controls(&self) -> Vec<(ControlRequest, Vec<u8>, usize)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Control { request, sent, read_len } => Some((request, sent, read_len)),
                _ => None,
            })
            .collect()
    }

    /// Line coding records written to the device.
    pub fn line_codings(&self) -> Vec<Vec<u8>> {
        self.controls()
            .into_iter()
            .filter(|(request, _, _)| *request == SET_LINE_CODING_REQUEST)
            .map(|(_, sent, _)| sent)
            .collect()
    }
}

pub type FailFn = dyn Fn(&ControlRequest) -> Option<ErrorKind> + Send + Sync;

/// Records every operation and answers from a fixed endpoint list.
pub struct MockConnection {
    pub log: EventLog,
    pub endpoints: Vec<EndpointInfo>,
    pub fail_claim: bool,
    pub fail_release: bool,
    pub fail: Box<FailFn>,
    /// Bytes reported as transferred for line coding writes.
    pub line_coding_len: Option<usize>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            log: EventLog::default(),
            endpoints: pl2303_endpoints(),
            fail_claim: false,
            fail_release: false,
            fail: Box::new(|_| None),
            line_coding_len: None,
        }
    }

    pub fn failing(mut self, fail: impl Fn(&ControlRequest) -> Option<ErrorKind> + Send + Sync + 'static) -> Self {
        self.fail = Box::new(fail);
        self
    }
}

impl UsbConnection for MockConnection {
    fn claim_interface(&self, interface: u8) -> Result<()> {
        self.log.push(Event::Claim(interface));
        if self.fail_claim {
            return Err(Error::new(ErrorKind::ResourceBusy, "claimed by kernel driver"));
        }
        Ok(())
    }

    fn release_interface(&self, interface: u8) -> Result<()> {
        self.log.push(Event::Release(interface));
        if self.fail_release {
            return Err(Error::new(ErrorKind::NotFound, "device gone"));
        }
        Ok(())
    }

    fn endpoints(&self, _interface: u8) -> Result<Vec<EndpointInfo>> {
        Ok(self.endpoints.clone())
    }

    fn control_transfer(&self, request: ControlRequest, data: Data<'_>, _timeout: Duration) -> Result<usize> {
        let (sent, read_len) = match &data {
            Data::In(buf) => (Vec::new(), buf.len()),
            Data::Out(buf) => (buf.to_vec(), 0),
        };
        self.log.push(Event::Control { request, sent, read_len });

        if let Some(kind) = (self.fail)(&request) {
            return Err(Error::new(kind, "mock transfer failure"));
        }

        match data {
            Data::In(buf) => {
                buf.fill(0x02);
                Ok(buf.len())
            }
            Data::Out(buf) if request == SET_LINE_CODING_REQUEST => Ok(self.line_coding_len.unwrap_or(buf.len())),
            Data::Out(buf) => Ok(buf.len()),
        }
    }
}

/// Worker that only records what the session asks of it.
pub struct MockWorker {
    pub name: &'static str,
    pub log: EventLog,
    pub running: bool,
    pub fail_start: bool,
}

impl MockWorker {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self { name, log: log.clone(), running: false, fail_start: false }
    }
}

impl BulkWorker for MockWorker {
    fn set_endpoint(&mut self, endpoint: EndpointInfo) {
        self.log.push(Event::Endpoint(self.name, endpoint.address));
    }

    fn restart(&mut self) -> pl2303::Result<()> {
        self.stop();
        if self.fail_start {
            return Err(pl2303::Error::Usb(Error::other("cannot spawn")));
        }
        self.log.push(Event::Start(self.name));
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.log.push(Event::Stop(self.name));
            self.running = false;
        }
    }
}

pub fn endpoint(address: u8, transfer_type: TransferType) -> EndpointInfo {
    let direction = if address & 0x80 != 0 { Direction::In } else { Direction::Out };
    EndpointInfo { address, direction, transfer_type, max_packet_size: 64 }
}

/// Endpoints of a PL2303: interrupt IN for modem status, bulk OUT and bulk IN.
pub fn pl2303_endpoints() -> Vec<EndpointInfo> {
    vec![
        endpoint(0x81, TransferType::Interrupt),
        endpoint(0x02, TransferType::Bulk),
        endpoint(0x83, TransferType::Bulk),
    ]
}
