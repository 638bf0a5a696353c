use nalgebra::Vector3;

use crate::auv::error::PortError;
use crate::auv::model::ParameterUpdate;

//all multi-byte fields are little endian

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthCommand{
    pub active: bool,
    pub depth: f32,       //meters
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AttitudeCommand{
    pub roll_active: bool,
    pub pitch_active: bool,
    pub roll: f32,        //degrees
    pub pitch: f32,
}

//force (N) or moment (N·m) the controller is applying to hold its setpoint
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResidualMsg{
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AckMsg{
    pub seq: u16,
    pub status: u8,       //0 = applied
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeartbeatMsg{
    pub counter: u32,
}

//sequence number followed by the JSON parameter snapshot
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconfigureMsg{
    pub seq: u16,
    pub update: ParameterUpdate,
}

//message sizes
pub const DEPTH_CMD_SIZE: usize = 5;        //u8 + f32
pub const ATTITUDE_CMD_SIZE: usize = 10;    //2 * u8 + 2 * f32
pub const RESIDUAL_MSG_SIZE: usize = 12;    //3 * f32
pub const ACK_MSG_SIZE: usize = 3;          //u16 + u8
pub const HEARTBEAT_MSG_SIZE: usize = 4;    //u32

pub const ACK_OK: u8 = 0;

fn f32_at(data: &[u8], offset: usize) -> f32{
    f32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

impl DepthCommand{
    pub fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < DEPTH_CMD_SIZE{
            return None;
        }
        Some(DepthCommand{ active: data[0] != 0, depth: f32_at(data, 1) })
    }

    pub fn to_bytes(&self) -> Vec<u8>{
        let mut bytes = Vec::with_capacity(DEPTH_CMD_SIZE);
        bytes.push(self.active as u8);
        bytes.extend_from_slice(&self.depth.to_le_bytes());
        bytes
    }
}

impl AttitudeCommand{
    pub fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < ATTITUDE_CMD_SIZE{
            return None;
        }
        Some(AttitudeCommand{
            roll_active: data[0] != 0,
            pitch_active: data[1] != 0,
            roll: f32_at(data, 2),
            pitch: f32_at(data, 6),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8>{
        let mut bytes = Vec::with_capacity(ATTITUDE_CMD_SIZE);
        bytes.push(self.roll_active as u8);
        bytes.push(self.pitch_active as u8);
        bytes.extend_from_slice(&self.roll.to_le_bytes());
        bytes.extend_from_slice(&self.pitch.to_le_bytes());
        bytes
    }
}

impl ResidualMsg{
    pub fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < RESIDUAL_MSG_SIZE{
            return None;
        }
        Some(ResidualMsg{ x: f32_at(data, 0), y: f32_at(data, 4), z: f32_at(data, 8) })
    }

    pub fn to_bytes(&self) -> Vec<u8>{
        let mut bytes = Vec::with_capacity(RESIDUAL_MSG_SIZE);
        bytes.extend_from_slice(&self.x.to_le_bytes());
        bytes.extend_from_slice(&self.y.to_le_bytes());
        bytes.extend_from_slice(&self.z.to_le_bytes());
        bytes
    }

    pub fn to_vector(&self) -> Vector3<f64>{
        Vector3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

impl AckMsg{
    pub fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < ACK_MSG_SIZE{
            return None;
        }
        Some(AckMsg{ seq: u16::from_le_bytes([data[0], data[1]]), status: data[2] })
    }

    pub fn to_bytes(&self) -> Vec<u8>{
        let mut bytes = self.seq.to_le_bytes().to_vec();
        bytes.push(self.status);
        bytes
    }
}

impl HeartbeatMsg{
    pub fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < HEARTBEAT_MSG_SIZE{
            return None;
        }
        Some(HeartbeatMsg{ counter: u32::from_le_bytes([data[0], data[1], data[2], data[3]]) })
    }

    pub fn to_bytes(&self) -> Vec<u8>{
        self.counter.to_le_bytes().to_vec()
    }
}

impl ReconfigureMsg{
    pub fn from_bytes(data: &[u8]) -> Option<Self>{
        if data.len() < 2{
            return None;
        }
        let seq = u16::from_le_bytes([data[0], data[1]]);
        let update = serde_json::from_slice(&data[2..]).ok()?;
        Some(ReconfigureMsg{ seq, update })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, PortError>{
        let mut bytes = self.seq.to_le_bytes().to_vec();
        serde_json::to_writer(&mut bytes, &self.update)
            .map_err(|e| PortError::Encode(e.to_string()))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_attitude_cmd_layout(){
        let cmd = AttitudeCommand{ roll_active: true, pitch_active: false, roll: 90.0, pitch: 0.0 };
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), ATTITUDE_CMD_SIZE);
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[1], 0);
        assert_eq!(&bytes[2..6], &90.0f32.to_le_bytes());
        assert_eq!(AttitudeCommand::from_bytes(&bytes), Some(cmd));
    }

    #[test]
    fn test_short_payloads_rejected(){
        assert!(DepthCommand::from_bytes(&[1, 0, 0]).is_none());
        assert!(ResidualMsg::from_bytes(&[0; 11]).is_none());
        assert!(AckMsg::from_bytes(&[0; 2]).is_none());
        assert!(HeartbeatMsg::from_bytes(&[]).is_none());
    }

    #[test]
    fn test_residual_to_vector(){
        let bytes = ResidualMsg{ x: 0.0, y: 0.5, z: -5.0 }.to_bytes();
        let msg = ResidualMsg::from_bytes(&bytes).unwrap();
        assert_eq!(msg.to_vector(), Vector3::new(0.0, 0.5, -5.0));
    }

    #[test]
    fn test_reconfigure_payload_uses_wire_names(){
        let msg = ReconfigureMsg{
            seq: 7,
            update: ParameterUpdate{ buoyant_force: 98.1, cob_x: 0.0, cob_y: 0.01, cob_z: -0.02 },
        };
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(&bytes[..2], &[7, 0]);

        let json = std::str::from_utf8(&bytes[2..]).unwrap();
        assert!(json.contains("\"Buoyant_Force\":98.1"));
        assert!(json.contains("\"Buoyancy_Z_POS\":-0.02"));
        assert!(bytes.len() <= super::super::MAX_MSG_SIZE);

        assert_eq!(ReconfigureMsg::from_bytes(&bytes), Some(msg));
    }
}
