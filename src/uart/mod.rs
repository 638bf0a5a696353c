pub mod protocol;
pub use protocol::*;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use serialport::SerialPort;

use crate::auv::error::PortError;
use crate::auv::model::ParameterUpdate;
use crate::auv::ports::{
    ParameterSink, ATTITUDE_COMMAND_TOPIC, DEPTH_COMMAND_TOPIC, FORCE_RESIDUAL_TOPIC,
    MOMENT_RESIDUAL_TOPIC, TOPIC_CAPACITY,
};
use crate::pubsub::{Subscriber, TopicRegistry};

pub const SYNC_BYTE: u8 = 0xAA;
pub const MAX_MSG_SIZE: usize = 244;
pub const DEFAULT_BAUD: u32 = 115_200;
pub const ACK_TOPIC: &str = "/controller/ack";
pub const HEARTBEAT_TOPIC: &str = "/controller/heartbeat";
pub const RECONFIGURE_TOPIC: &str = "/controller/reconfigure";
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

const READ_TIMEOUT: Duration = Duration::from_millis(10);

//write half of the serial port, shared by the bridge and the parameter sink
pub type SharedWriter = Arc<Mutex<dyn Write + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType{
    Heartbeat = 0x04,
    Ack = 0x11,
    DepthCommand = 0x20,
    AttitudeCommand = 0x21,
    ForceResidual = 0x30,
    MomentResidual = 0x31,
    Reconfigure = 0x40,
}

impl MsgType{
    pub fn from_u8(val: u8) -> Option<Self>{
        match val{
            0x04 => Some(MsgType::Heartbeat),
            0x11 => Some(MsgType::Ack),
            0x20 => Some(MsgType::DepthCommand),
            0x21 => Some(MsgType::AttitudeCommand),
            0x30 => Some(MsgType::ForceResidual),
            0x31 => Some(MsgType::MomentResidual),
            0x40 => Some(MsgType::Reconfigure),
            _ => None,
        }
    }

    pub fn to_topic_name(&self) -> &'static str{
        match self{
            MsgType::Heartbeat => HEARTBEAT_TOPIC,
            MsgType::Ack => ACK_TOPIC,
            MsgType::DepthCommand => DEPTH_COMMAND_TOPIC,
            MsgType::AttitudeCommand => ATTITUDE_COMMAND_TOPIC,
            MsgType::ForceResidual => FORCE_RESIDUAL_TOPIC,
            MsgType::MomentResidual => MOMENT_RESIDUAL_TOPIC,
            MsgType::Reconfigure => RECONFIGURE_TOPIC,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UartFrame{
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

pub fn calculate_checksum(data: &[u8]) -> u8{
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

//frame format: [SYNC][TYPE][LEN][PAYLOAD...][CHECKSUM]
//              0xAA  1byte 1byte  LEN bytes   1byte
pub fn encode_frame(msg_type: MsgType, payload: &[u8]) -> Result<Vec<u8>, PortError>{
    if payload.len() > MAX_MSG_SIZE{
        return Err(PortError::Encode(format!("payload of {} bytes exceeds {}", payload.len(), MAX_MSG_SIZE)));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.push(SYNC_BYTE);
    frame.push(msg_type as u8);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(calculate_checksum(&frame[1..]));
    Ok(frame)
}

pub fn write_frame(writer: &SharedWriter, msg_type: MsgType, payload: &[u8]) -> Result<(), PortError>{
    let frame = encode_frame(msg_type, payload)?;
    let mut port = writer.lock().unwrap_or_else(PoisonError::into_inner);
    port.write_all(&frame)?;
    port.flush()?;
    Ok(())
}

//incremental frame parser; resyncs on the next sync byte after garbage
#[derive(Debug, Default)]
pub struct FrameDecoder{
    rx_buffer: Vec<u8>,
    dropped: usize,
}

impl FrameDecoder{
    pub fn new() -> Self{
        FrameDecoder{ rx_buffer: Vec::with_capacity(512), dropped: 0 }
    }

    pub fn extend(&mut self, data: &[u8]){
        self.rx_buffer.extend_from_slice(data);
    }

    //frames discarded for bad length, checksum or type
    pub fn dropped(&self) -> usize{
        self.dropped
    }

    pub fn next_frame(&mut self) -> Option<UartFrame>{
        loop{
            let sync_pos = match self.rx_buffer.iter().position(|&b| b == SYNC_BYTE){
                Some(pos) => pos,
                None =>{
                    self.rx_buffer.clear();
                    return None;
                }
            };
            if sync_pos > 0{
                self.rx_buffer.drain(0..sync_pos);
            }

            if self.rx_buffer.len() < 4{
                return None;
            }

            let msg_type_byte = self.rx_buffer[1];
            let len = self.rx_buffer[2] as usize;

            if len > MAX_MSG_SIZE{
                self.reject("oversized frame");
                continue;
            }

            let frame_len = 4 + len; //sync + type + len + payload + checksum
            if self.rx_buffer.len() < frame_len{
                return None;
            }

            let checksum = self.rx_buffer[3 + len];
            if checksum != calculate_checksum(&self.rx_buffer[1..3 + len]){
                self.reject("checksum mismatch");
                continue;
            }

            let Some(msg_type) = MsgType::from_u8(msg_type_byte) else{
                self.rx_buffer.drain(0..frame_len);
                self.dropped += 1;
                log::warn!("dropping frame with unknown type 0x{:02x}", msg_type_byte);
                continue;
            };

            let payload = self.rx_buffer[3..3 + len].to_vec();
            self.rx_buffer.drain(0..frame_len);
            return Some(UartFrame{ msg_type, payload });
        }
    }

    fn reject(&mut self, reason: &str){
        log::warn!("dropping frame: {}", reason);
        self.dropped += 1;
        self.rx_buffer.remove(0);
    }
}

//publishes inbound frames, forwards command topics out
struct Bridge<R: Read>{
    reader: R,
    writer: SharedWriter,
    registry: Arc<TopicRegistry>,
    running: Arc<AtomicBool>,
    decoder: FrameDecoder,
    depth: Subscriber<DepthCommand>,
    attitude: Subscriber<AttitudeCommand>,
}

impl<R: Read> Bridge<R>{
    fn new(reader: R, writer: SharedWriter, registry: Arc<TopicRegistry>, running: Arc<AtomicBool>) -> Self{
        let depth = Subscriber::new(registry.get_or_create(DEPTH_COMMAND_TOPIC, TOPIC_CAPACITY));
        let attitude = Subscriber::new(registry.get_or_create(ATTITUDE_COMMAND_TOPIC, TOPIC_CAPACITY));
        //only forward setpoints issued after the bridge comes up
        depth.mark_seen();
        attitude.mark_seen();

        Bridge{
            reader,
            writer,
            registry,
            running,
            decoder: FrameDecoder::new(),
            depth,
            attitude,
        }
    }

    fn run_loop(&mut self){
        let mut read_buf = [0u8; 256];

        while self.running.load(Ordering::SeqCst){
            match self.reader.read(&mut read_buf){
                Ok(n) if n > 0 => self.handle_bytes(&read_buf[..n]),
                Ok(_) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => log::error!("UART read error: {}", e),
            }

            if let Err(e) = self.forward_commands(){
                log::error!("UART write error: {}", e);
            }
        }
        log::info!("UART bridge stopped");
    }

    fn handle_bytes(&mut self, data: &[u8]){
        self.decoder.extend(data);
        while let Some(frame) = self.decoder.next_frame(){
            self.publish_frame(&frame);
        }
    }

    fn publish_frame(&self, frame: &UartFrame){
        let topic_name = frame.msg_type.to_topic_name();
        let published = match frame.msg_type{
            MsgType::ForceResidual | MsgType::MomentResidual =>
                ResidualMsg::from_bytes(&frame.payload)
                    .map(|msg| self.registry.get_or_create(topic_name, TOPIC_CAPACITY).publish(msg)),
            MsgType::Ack =>
                AckMsg::from_bytes(&frame.payload)
                    .map(|msg| self.registry.get_or_create(topic_name, TOPIC_CAPACITY).publish(msg)),
            MsgType::Heartbeat =>
                HeartbeatMsg::from_bytes(&frame.payload)
                    .map(|msg| self.registry.get_or_create(topic_name, TOPIC_CAPACITY).publish(msg)),
            other =>{
                log::warn!("ignoring outbound-only message {:?} from controller", other);
                return;
            }
        };
        if published.is_none(){
            log::warn!("short {:?} payload ({} bytes)", frame.msg_type, frame.payload.len());
        }
    }

    fn forward_commands(&self) -> Result<(), PortError>{
        if self.depth.has_new(){
            self.depth.mark_seen();
            if let Some((cmd, _)) = self.depth.peek_latest(){
                write_frame(&self.writer, MsgType::DepthCommand, &cmd.to_bytes())?;
            }
        }
        if self.attitude.has_new(){
            self.attitude.mark_seen();
            if let Some((cmd, _)) = self.attitude.peek_latest(){
                write_frame(&self.writer, MsgType::AttitudeCommand, &cmd.to_bytes())?;
            }
        }
        Ok(())
    }
}

/// Serial connection to the vehicle's depth/attitude controller.
pub struct UartLink{
    writer: SharedWriter,
    registry: Arc<TopicRegistry>,
    running: Arc<AtomicBool>,
}

impl UartLink{
    pub fn open(port_name: &str, baud_rate: u32, registry: Arc<TopicRegistry>) -> Result<(Self, JoinHandle<()>), serialport::Error>{
        let port: Box<dyn SerialPort> = serialport::new(port_name, baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        let writer: SharedWriter = Arc::new(Mutex::new(port.try_clone()?));
        log::info!("opened {} at {} baud", port_name, baud_rate);

        let running = Arc::new(AtomicBool::new(true));
        let mut bridge = Bridge::new(port, Arc::clone(&writer), Arc::clone(&registry), Arc::clone(&running));
        let handle = thread::spawn(move ||{
            bridge.run_loop();
        });

        Ok((UartLink{ writer, registry, running }, handle))
    }

    pub fn registry(&self) -> &Arc<TopicRegistry>{
        &self.registry
    }

    pub fn parameter_sink(&self) -> UartParameterSink{
        UartParameterSink::new(Arc::clone(&self.writer), &self.registry)
    }

    pub fn is_running(&self) -> bool{
        self.running.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self){
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Pushes buoyancy parameters over the serial link and waits for the controller's ack.
pub struct UartParameterSink{
    writer: SharedWriter,
    acks: Subscriber<AckMsg>,
    heartbeats: Subscriber<HeartbeatMsg>,
    seq: u16,
    ack_timeout: Duration,
}

impl UartParameterSink{
    pub fn new(writer: SharedWriter, registry: &TopicRegistry) -> Self{
        UartParameterSink{
            writer,
            acks: Subscriber::new(registry.get_or_create(ACK_TOPIC, TOPIC_CAPACITY)),
            heartbeats: Subscriber::new(registry.get_or_create(HEARTBEAT_TOPIC, TOPIC_CAPACITY)),
            seq: 0,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self{
        self.ack_timeout = timeout;
        self
    }
}

impl ParameterSink for UartParameterSink{
    fn connect(&mut self, timeout: Duration) -> Result<(), PortError>{
        self.heartbeats.mark_seen();
        write_frame(&self.writer, MsgType::Heartbeat, &HeartbeatMsg::default().to_bytes())?;
        self.heartbeats
            .wait_next(timeout)
            .map(|_| ())
            .ok_or(PortError::Timeout("controller heartbeat"))
    }

    fn apply(&mut self, update: &ParameterUpdate) -> Result<(), PortError>{
        self.seq = self.seq.wrapping_add(1);
        let payload = ReconfigureMsg{ seq: self.seq, update: *update }.to_bytes()?;

        //acks already queued belong to earlier pushes
        self.acks.mark_seen();
        while self.acks.try_recv().is_some(){}
        write_frame(&self.writer, MsgType::Reconfigure, &payload)?;

        let deadline = Instant::now() + self.ack_timeout;
        loop{
            while let Some(ack) = self.acks.try_recv(){
                if ack.seq != self.seq{
                    continue; //late ack for an earlier push
                }
                if ack.status != ACK_OK{
                    return Err(PortError::Rejected(format!("reconfigure {} status {}", ack.seq, ack.status)));
                }
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero(){
                return Err(PortError::Timeout("reconfigure ack"));
            }
            //wakeup only; the queue drain above does the matching
            self.acks.wait_next(remaining);
        }
    }
}
