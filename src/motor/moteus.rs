// Moteus register protocol: command frame encoding and telemetry decoding
//
// The register command set is documented in
// https://github.com/mjbots/moteus/blob/master/docs/reference.md
//
// A frame is an ordered stream of opcodes. The opcode byte packs the
// operation base in the high bits, the numeric type in bits 3:2 and an
// inline element count in bits 1:0 (0 = varuint count follows).

use std::collections::BTreeMap;

/// Telemetry registers
pub const REG_MODE: u32 = 0x000;
pub const REG_POSITION: u32 = 0x001;
pub const REG_VELOCITY: u32 = 0x002;
pub const REG_TORQUE: u32 = 0x003;
pub const REG_VOLTAGE: u32 = 0x00d;
pub const REG_TEMPERATURE: u32 = 0x00e;
pub const REG_FAULT: u32 = 0x00f;

/// Position-mode command registers (six consecutive f32 slots)
pub const REG_CMD_POSITION: u32 = 0x20;
pub const REG_CMD_VELOCITY: u32 = 0x21;
pub const REG_CMD_FF_TORQUE: u32 = 0x22;
pub const REG_CMD_KP_SCALE: u32 = 0x23;
pub const REG_CMD_KD_SCALE: u32 = 0x24;
pub const REG_CMD_MAX_TORQUE: u32 = 0x25;

/// Opcode bases
const WRITE_BASE: u8 = 0x00;
const READ_BASE: u8 = 0x10;
const REPLY_BASE: u8 = 0x20;
const WRITE_ERROR: u8 = 0x30;
const READ_ERROR: u8 = 0x31;
const NOP: u8 = 0x50;

/// Voltage register LSB in volts
pub const VOLTAGE_LSB: f64 = 0.5;

/// Numeric types carried in bits 3:2 of an opcode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Int8 = 0,
    Int16 = 1,
    Int32 = 2,
    F32 = 3,
}

impl FieldType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FieldType::Int8,
            1 => FieldType::Int16,
            2 => FieldType::Int32,
            _ => FieldType::F32,
        }
    }

    fn size(self) -> usize {
        match self {
            FieldType::Int8 => 1,
            FieldType::Int16 => 2,
            FieldType::Int32 => 4,
            FieldType::F32 => 4,
        }
    }
}

/// Controller operating modes (mode register values)
#[repr(i8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stopped = 0,
    Fault = 1,
    Pwm = 5,
    Voltage = 6,
    VoltageFoc = 7,
    VoltageDq = 8,
    Current = 9,
    Position = 10,
    Timeout = 11,
    ZeroVelocity = 12,
}

impl Mode {
    pub fn from_raw(raw: i8) -> Option<Mode> {
        match raw {
            0 => Some(Mode::Stopped),
            1 => Some(Mode::Fault),
            5 => Some(Mode::Pwm),
            6 => Some(Mode::Voltage),
            7 => Some(Mode::VoltageFoc),
            8 => Some(Mode::VoltageDq),
            9 => Some(Mode::Current),
            10 => Some(Mode::Position),
            11 => Some(Mode::Timeout),
            12 => Some(Mode::ZeroVelocity),
            _ => None,
        }
    }
}

/// Decode faults. An unrecognized opcode is NOT a fault, it terminates
/// the stream cleanly.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("varuint truncated mid-encoding")]
    TruncatedVarint,

    #[error("varuint exceeds 5 bytes")]
    MalformedVarint,

    #[error("frame ends inside a {0} byte value")]
    Truncated(usize),
}

/// One decoded register slot. Write/read errors reported by the node are
/// kept distinct from numeric samples so "fault on register X" is never
/// confused with "value 0 on register X".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Float(f32),
    WriteError(u32),
    ReadError(u32),
}

impl RegisterValue {
    /// Numeric view; `None` for error markers.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            RegisterValue::Int8(v) => Some(v as f64),
            RegisterValue::Int16(v) => Some(v as f64),
            RegisterValue::Int32(v) => Some(v as f64),
            RegisterValue::Float(v) => Some(v as f64),
            RegisterValue::WriteError(_) | RegisterValue::ReadError(_) => None,
        }
    }
}

pub type RegisterMap = BTreeMap<u32, RegisterValue>;

/// Typed command variants replacing the original's optional-argument
/// controller methods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    /// Clears latched faults and de-energizes the actuator.
    Stop,
    Position(PositionCommand),
    Velocity(VelocityCommand),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionCommand {
    /// Target position in device rotations
    pub position: f64,
    pub velocity: f64,
    pub ff_torque: f64,
    pub kp_scale: f64,
    pub kd_scale: f64,
    pub max_torque: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityCommand {
    pub velocity: f64,
    pub ff_torque: f64,
    pub kd_scale: f64,
    pub max_torque: f64,
}

impl MotorCommand {
    /// Encode the command into a fresh frame. With `query`, telemetry
    /// read opcodes are appended so the node replies with mode, position,
    /// velocity, torque, voltage, temperature and fault.
    pub fn encode(&self, query: bool) -> Vec<u8> {
        let mut frame = FrameBuilder::new();
        match *self {
            MotorCommand::Stop => {
                frame.write_i8(REG_MODE, Mode::Stopped as i8);
            }
            MotorCommand::Position(cmd) => {
                frame.write_i8(REG_MODE, Mode::Position as i8);
                frame.write_f32_span(
                    REG_CMD_POSITION,
                    &[
                        cmd.position as f32,
                        cmd.velocity as f32,
                        cmd.ff_torque as f32,
                        cmd.kp_scale as f32,
                        cmd.kd_scale as f32,
                        cmd.max_torque as f32,
                    ],
                );
            }
            MotorCommand::Velocity(cmd) => {
                // Velocity control is position mode with an unset target
                // and the position gain zeroed.
                frame.write_i8(REG_MODE, Mode::Position as i8);
                frame.write_f32_span(
                    REG_CMD_POSITION,
                    &[
                        f32::NAN,
                        cmd.velocity as f32,
                        cmd.ff_torque as f32,
                        0.0,
                        cmd.kd_scale as f32,
                        cmd.max_torque as f32,
                    ],
                );
            }
        }
        if query {
            frame.append_query();
        }
        frame.into_bytes()
    }
}

/// Standalone telemetry poll with no command attached.
pub fn query_frame() -> Vec<u8> {
    let mut frame = FrameBuilder::new();
    frame.append_query();
    frame.into_bytes()
}

/// Builds the opcode stream for one command frame. Frames are write-once:
/// built, handed to the transport, dropped.
struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(32),
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Opcode byte for `count` elements; counts above the 2-bit inline
    /// field fall back to a trailing varuint count.
    fn push_opcode(&mut self, base: u8, field_type: FieldType, count: u32) {
        debug_assert!(count > 0);
        let type_bits = (field_type as u8) << 2;
        if count <= 3 {
            self.buf.push(base | type_bits | count as u8);
        } else {
            self.buf.push(base | type_bits);
            write_varuint(&mut self.buf, count);
        }
    }

    fn write_i8(&mut self, reg: u32, value: i8) {
        self.push_opcode(WRITE_BASE, FieldType::Int8, 1);
        write_varuint(&mut self.buf, reg);
        self.buf.push(value as u8);
    }

    fn write_f32_span(&mut self, start_reg: u32, values: &[f32]) {
        self.push_opcode(WRITE_BASE, FieldType::F32, values.len() as u32);
        write_varuint(&mut self.buf, start_reg);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn read(&mut self, field_type: FieldType, start_reg: u32, count: u32) {
        self.push_opcode(READ_BASE, field_type, count);
        write_varuint(&mut self.buf, start_reg);
    }

    fn append_query(&mut self) {
        // f32 mode/position/velocity/torque, then int8 voltage/temp/fault
        self.read(FieldType::F32, REG_MODE, 4);
        self.read(FieldType::Int8, REG_VOLTAGE, 3);
    }
}

/// Little-endian base-128 with continuation in bit 7.
fn write_varuint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            return;
        }
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn next_byte(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Truncated(n));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Running out of bytes mid-varuint is a hard fault, unlike running
    /// out at an opcode boundary.
    fn read_varuint(&mut self) -> Result<u32, CodecError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        for _ in 0..5 {
            let byte = self.next_byte().ok_or(CodecError::TruncatedVarint)?;
            result |= ((byte & 0x7f) as u32) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(CodecError::MalformedVarint)
    }

    fn read_value(&mut self, field_type: FieldType) -> Result<RegisterValue, CodecError> {
        let bytes = self.take(field_type.size())?;
        Ok(match field_type {
            FieldType::Int8 => RegisterValue::Int8(bytes[0] as i8),
            FieldType::Int16 => RegisterValue::Int16(i16::from_le_bytes([bytes[0], bytes[1]])),
            FieldType::Int32 => RegisterValue::Int32(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            FieldType::F32 => RegisterValue::Float(f32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
        })
    }
}

/// Parse a telemetry frame into a register map. Decoding stops cleanly at
/// end of input or at the first unrecognized opcode; whatever was parsed
/// up to that point is returned.
pub fn parse_reply(data: &[u8]) -> Result<RegisterMap, CodecError> {
    let mut cur = Cursor::new(data);
    let mut registers = RegisterMap::new();

    while let Some(opcode) = cur.next_byte() {
        let base = opcode & !0x0f;
        if base == REPLY_BASE {
            let field_type = FieldType::from_bits((opcode & 0x0c) >> 2);
            let mut count = (opcode & 0x03) as u32;
            if count == 0 {
                count = cur.read_varuint()?;
            }
            let start_reg = cur.read_varuint()?;
            for i in 0..count {
                let value = cur.read_value(field_type)?;
                registers.insert(start_reg + i, value);
            }
        } else if opcode == WRITE_ERROR || opcode == READ_ERROR {
            let reg = cur.read_varuint()?;
            let err = cur.read_varuint()?;
            let value = if opcode == WRITE_ERROR {
                RegisterValue::WriteError(err)
            } else {
                RegisterValue::ReadError(err)
            };
            registers.insert(reg, value);
        } else if base == NOP {
            continue;
        } else {
            // Unknown opcode terminates the stream, by contract.
            break;
        }
    }

    Ok(registers)
}

/// One joint's telemetry. Only registers present in the reply populate
/// fields; the rest stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySample {
    pub mode: Option<i8>,
    /// Device rotations
    pub position: Option<f64>,
    /// Device rotations per second
    pub velocity: Option<f64>,
    /// Newton-meters
    pub torque: Option<f64>,
    /// Raw register value, 0.5 V per count
    pub voltage: Option<i8>,
    /// Degrees Celsius
    pub temperature: Option<i8>,
    pub fault: Option<i32>,
}

impl TelemetrySample {
    pub fn from_registers(registers: &RegisterMap) -> Self {
        let num = |reg: u32| registers.get(&reg).and_then(RegisterValue::as_f64);
        Self {
            mode: num(REG_MODE).map(|v| v as i8),
            position: num(REG_POSITION),
            velocity: num(REG_VELOCITY),
            torque: num(REG_TORQUE),
            voltage: num(REG_VOLTAGE).map(|v| v as i8),
            temperature: num(REG_TEMPERATURE).map(|v| v as i8),
            fault: num(REG_FAULT).map(|v| v as i32),
        }
    }

    pub fn mode_enum(&self) -> Option<Mode> {
        self.mode.and_then(Mode::from_raw)
    }

    pub fn voltage_volts(&self) -> Option<f64> {
        self.voltage.map(|v| v as f64 * VOLTAGE_LSB)
    }

    pub fn position_deg(&self) -> Option<f64> {
        self.position.map(|v| v * 360.0)
    }

    pub fn velocity_dps(&self) -> Option<f64> {
        self.velocity.map(|v| v * 360.0)
    }
}
