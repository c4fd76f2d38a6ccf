//! Touch bar (Z2) firmware image
//!
//! Little endian command stream after an 8 byte `Z2FW` header. Each
//! command is `u32 code, u32 length, payload`, zero padded to 4 bytes; the
//! padding is not part of the length.

use std::rc::Rc;

use log::warn;

use fwcore::buf::{byte_sum, zero_pad4};

use super::plist::{Dict, Value};
use super::{as_dict, data_field, entry_type, field, u32_field, ConfigError};

pub const MAGIC: &[u8; 4] = b"Z2FW";
pub const VERSION: u32 = 1;

const CMD_INIT_PAYLOAD: u32 = 0;
const CMD_SEND_BLOB: u32 = 1;
const CMD_SEND_CALIBRATION: u32 = 2;

const BLOB_WRITE: u16 = 0x3001;
const BLOB_REQUEST_CALIBRATION: u16 = 0x1f01;
const BLOB_READ_MODIFY_WRITE: u16 = 0x1e33;

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn command(out: &mut Vec<u8>, code: u32, len: usize) -> Result<(), ConfigError> {
    let len = u32::try_from(len)
        .map_err(|_| ConfigError::UnsupportedValue(format!("command of {} bytes", len)))?;
    put_u32(out, code);
    put_u32(out, len);
    Ok(())
}

fn init_payload(entries: &[&Dict]) -> Result<Vec<u8>, ConfigError> {
    for entry in entries {
        if entry_type(entry)? == "Config" {
            let config = as_dict(field(entry, "Config")?, "Config")?;
            let spi = as_dict(field(config, "SPI Config")?, "SPI Config")?;
            return Ok(data_field(spi, "Init Payload")?.to_vec());
        }
    }
    Err(ConfigError::MalformedConfig(
        "no Config entry with an init payload".to_string(),
    ))
}

fn send_blob(out: &mut Vec<u8>, entry: &Dict) -> Result<(), ConfigError> {
    let payload = data_field(entry, "Payload")?;
    let words = u16::try_from((payload.len() + 3) / 4).map_err(|_| {
        ConfigError::UnsupportedValue(format!("blob of {} bytes", payload.len()))
    })?;

    command(out, CMD_SEND_BLOB, 14 + payload.len())?;

    let mut header = Vec::with_capacity(8);
    put_u16(&mut header, BLOB_WRITE);
    put_u16(&mut header, words);
    put_u32(&mut header, u32_field(entry, "Address")?);
    out.extend_from_slice(&header);
    put_u16(out, byte_sum(&header[2..]) as u16);

    out.extend_from_slice(payload);
    put_u32(out, byte_sum(payload));
    Ok(())
}

fn read_modify_write(out: &mut Vec<u8>, entry: &Dict) -> Result<(), ConfigError> {
    let mut data = Vec::with_capacity(14);
    put_u16(&mut data, BLOB_READ_MODIFY_WRITE);
    put_u32(&mut data, u32_field(entry, "Address")?);
    put_u32(&mut data, u32_field(entry, "Mask")?);
    put_u32(&mut data, u32_field(entry, "Value")?);

    command(out, CMD_SEND_BLOB, 16)?;
    out.extend_from_slice(&data);
    put_u16(out, byte_sum(&data[2..]) as u16);
    Ok(())
}

/// Encode a touch bar config list.
///
/// The init payload comes from the first `Config` entry; other `Config`
/// entries emit nothing, unknown entry types are skipped.
pub fn encode(config: &[Rc<Value>]) -> Result<Vec<u8>, ConfigError> {
    let entries = config
        .iter()
        .map(|e| as_dict(e, "config entry"))
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    put_u32(&mut out, VERSION);

    let init = init_payload(&entries)?;
    command(&mut out, CMD_INIT_PAYLOAD, init.len())?;
    out.extend_from_slice(&init);
    zero_pad4(&mut out);

    for entry in &entries {
        match entry_type(entry)? {
            "Binary" => send_blob(&mut out, entry)?,
            "Property" => {
                put_u32(&mut out, CMD_SEND_CALIBRATION);
                put_u32(&mut out, u32_field(entry, "Address")?);
            }
            "RequestCalibration" => {
                command(&mut out, CMD_SEND_BLOB, 2)?;
                put_u16(&mut out, BLOB_REQUEST_CALIBRATION);
            }
            "ReadModifyWrite" => read_modify_write(&mut out, entry)?,
            "Config" => {}
            other => warn!("touchbar: skipping unknown config entry type {:?}", other),
        }
        zero_pad4(&mut out);
    }

    Ok(out)
}
