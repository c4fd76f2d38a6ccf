//! Trackpad (HIDF) firmware image
//!
//! ```text
//! 0x00  "HIDF"
//! 0x04  u32 version (1)
//! 0x08  u32 header size (32)
//! 0x0c  u32 body size
//! 0x10  u32 body offset of the interface number placeholder
//! 0x14  12 bytes zero
//! 0x20  body
//! ```
//!
//! The body is a compact tagged encoding of the config list. Only the
//! short length forms exist; anything larger is an `UnsupportedValue`.
//! Multi-byte integers in the body are big endian, the header is little
//! endian.

use std::collections::HashSet;
use std::rc::Rc;

use fwcore::buf::pad_len;

use super::plist::Value;
use super::{as_dict, entry_type, field, ConfigError};

pub const MAGIC: &[u8; 4] = b"HIDF";
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 32;

pub const INTERFACE_NUMBER: &str = "bInterfaceNumber";
const RECORDER_DESCRIPTOR: &str = "HIDRecorder Descriptor";

const TRUE: u8 = 0xf5;
const UINT8: u8 = 0x18;
const UINT16: u8 = 0x19;
const UINT32: u8 = 0x1a;
const DATA16: u8 = 0x59;
const STRING: u8 = 0x60;
const STRING8: u8 = 0x78;
const ARRAY: u8 = 0x80;
const DICT: u8 = 0xa0;
const FILLER: u8 = 0xd3;

const SHORT_LEN: usize = 0x18;
const DICT_SHORT_LEN: usize = 0x10;

fn unsupported(what: String) -> ConfigError {
    ConfigError::UnsupportedValue(what)
}

// Interface dicts whose interface number is replaced by the placeholder
fn interface_dicts(config: &[Rc<Value>]) -> Result<HashSet<*const Value>, ConfigError> {
    let mut dicts = HashSet::new();
    for entry in config {
        let entry = as_dict(entry, "config entry")?;
        if entry_type(entry)? != "Config" {
            continue;
        }

        let cfg = as_dict(field(entry, "Config")?, "Config")?;
        let ifaces = field(cfg, "Interface Config")?;
        let ifaces = ifaces.as_array().ok_or_else(|| {
            ConfigError::MalformedConfig("\"Interface Config\" is not an array".to_string())
        })?;

        for iface in ifaces {
            if !as_dict(iface, "interface")?.contains_key(RECORDER_DESCRIPTOR) {
                dicts.insert(Rc::as_ptr(iface));
            }
        }
    }
    Ok(dicts)
}

struct Encoder {
    body: Vec<u8>,
    placeholders: HashSet<*const Value>,
    iface_offset: Option<usize>,
}

impl Encoder {
    fn new(placeholders: HashSet<*const Value>) -> Self {
        Encoder {
            body: vec![],
            placeholders,
            iface_offset: None,
        }
    }

    fn integer(&mut self, v: i64) -> Result<(), ConfigError> {
        let v = u32::try_from(v).map_err(|_| unsupported(format!("integer {}", v)))?;
        if v < SHORT_LEN as u32 {
            self.body.push(v as u8);
        } else if let Ok(v) = u8::try_from(v) {
            self.body.extend_from_slice(&[UINT8, v]);
        } else if let Ok(v) = u16::try_from(v) {
            self.body.push(UINT16);
            self.body.extend_from_slice(&v.to_be_bytes());
        } else {
            self.body.push(UINT32);
            self.body.extend_from_slice(&v.to_be_bytes());
        }
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<(), ConfigError> {
        // Length includes the NUL terminator
        let len = s.len() + 1;
        if len < SHORT_LEN {
            self.body.push(STRING + len as u8);
        } else if len <= 0xff {
            self.body.extend_from_slice(&[STRING8, len as u8]);
        } else {
            return Err(unsupported(format!("string of {} bytes", len)));
        }
        self.body.extend_from_slice(s.as_bytes());
        self.body.push(0);
        Ok(())
    }

    fn data(&mut self, data: &[u8]) -> Result<(), ConfigError> {
        let len = u16::try_from(data.len())
            .map_err(|_| unsupported(format!("data of {} bytes", data.len())))?;

        // Payload bytes land on a 4 byte boundary
        let pad = pad_len(self.body.len() as u64 + 3, 4);
        self.body.resize(self.body.len() + pad, FILLER);

        self.body.push(DATA16);
        self.body.extend_from_slice(&len.to_be_bytes());
        self.body.extend_from_slice(data);
        Ok(())
    }

    fn placeholder(&mut self) -> Result<(), ConfigError> {
        if self.iface_offset.is_some() {
            return Err(ConfigError::MalformedConfig(format!(
                "{} found more than once",
                INTERFACE_NUMBER
            )));
        }
        self.iface_offset = Some(self.body.len());
        self.body.push(0);
        Ok(())
    }

    fn array(&mut self, items: &[Rc<Value>]) -> Result<(), ConfigError> {
        if items.len() >= SHORT_LEN {
            return Err(unsupported(format!("array of {} items", items.len())));
        }
        self.body.push(ARRAY + items.len() as u8);
        for item in items {
            self.value(item)?;
        }
        Ok(())
    }

    fn value(&mut self, value: &Rc<Value>) -> Result<(), ConfigError> {
        match &**value {
            Value::Boolean(true) => self.body.push(TRUE),
            Value::Boolean(false) => self.integer(0)?,
            Value::Integer(i) => self.integer(*i)?,
            Value::String(s) => self.string(s)?,
            Value::Data(d) => self.data(d)?,
            Value::Array(items) => self.array(items)?,
            Value::Dict(dict) => {
                let iface = self.placeholders.contains(&Rc::as_ptr(value));
                let append = iface && !dict.contains_key(INTERFACE_NUMBER);

                let len = dict.len() + append as usize;
                if len >= DICT_SHORT_LEN {
                    return Err(unsupported(format!("dict of {} entries", len)));
                }
                self.body.push(DICT + len as u8);

                for (key, v) in dict.iter() {
                    self.string(key)?;
                    if iface && key == INTERFACE_NUMBER {
                        self.placeholder()?;
                    } else {
                        self.value(v)?;
                    }
                }
                if append {
                    self.string(INTERFACE_NUMBER)?;
                    self.placeholder()?;
                }
            }
            other @ (Value::Real(_) | Value::Date(_)) => {
                return Err(unsupported(format!("{} value", other.kind())))
            }
        }
        Ok(())
    }
}

/// Encode a trackpad config list into a complete firmware image.
pub fn encode(config: &[Rc<Value>]) -> Result<Vec<u8>, ConfigError> {
    let mut encoder = Encoder::new(interface_dicts(config)?);
    encoder.array(config)?;

    let iface_offset = encoder.iface_offset.ok_or_else(|| {
        ConfigError::MalformedConfig(format!("no {} in config", INTERFACE_NUMBER))
    })?;
    let body = encoder.body;

    let too_large = |_| unsupported(format!("body of {} bytes", body.len()));
    let body_len = u32::try_from(body.len()).map_err(too_large)?;
    let iface_offset = u32::try_from(iface_offset).map_err(too_large)?;

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(HEADER_LEN as u32).to_le_bytes());
    out.extend_from_slice(&body_len.to_le_bytes());
    out.extend_from_slice(&iface_offset.to_le_bytes());
    out.resize(HEADER_LEN, 0);
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod test_trackpad {
    use super::*;
    use crate::multitouch::plist::from_xml;

    fn body_of(values: &[Rc<Value>]) -> Result<Vec<u8>, ConfigError> {
        let mut encoder = Encoder::new(HashSet::new());
        encoder.array(values)?;
        Ok(encoder.body)
    }

    fn ints(values: &[i64]) -> Vec<Rc<Value>> {
        values.iter().map(|i| Rc::new(Value::Integer(*i))).collect()
    }

    #[test]
    fn integers() {
        assert_eq!(
            body_of(&ints(&[0x17, 0x18, 0xff, 0x100, 0xffff, 0x10000])).unwrap(),
            vec![
                0x86, 0x17, 0x18, 0x18, 0x18, 0xff, 0x19, 0x01, 0x00, 0x19, 0xff, 0xff, 0x1a,
                0x00, 0x01, 0x00, 0x00
            ]
        );
        assert!(matches!(
            body_of(&ints(&[-1])),
            Err(ConfigError::UnsupportedValue(_))
        ));
        assert!(matches!(
            body_of(&ints(&[1 << 32])),
            Err(ConfigError::UnsupportedValue(_))
        ));
    }

    #[test]
    fn booleans_and_strings() {
        let values = vec![
            Rc::new(Value::Boolean(true)),
            Rc::new(Value::Boolean(false)),
            Rc::new(Value::String("ab".to_string())),
            Rc::new(Value::String("x".repeat(0x17))),
        ];
        let body = body_of(&values).unwrap();

        assert_eq!(&body[..7], &[0x84, 0xf5, 0x00, 0x63, b'a', b'b', 0x00]);
        assert_eq!(&body[7..9], &[0x78, 0x18]);
        assert_eq!(body.len(), 9 + 0x18);

        let long = vec![Rc::new(Value::String("x".repeat(0xff)))];
        assert!(matches!(
            body_of(&long),
            Err(ConfigError::UnsupportedValue(_))
        ));
    }

    #[test]
    fn data_is_aligned() {
        let values = vec![
            Rc::new(Value::Integer(1)),
            Rc::new(Value::Data(b"ab".to_vec())),
        ];
        assert_eq!(
            body_of(&values).unwrap(),
            vec![0x82, 0x01, 0xd3, 0xd3, 0xd3, 0x59, 0x00, 0x02, b'a', b'b']
        );

        // Already aligned, no filler
        let values = vec![Rc::new(Value::Data(vec![7]))];
        assert_eq!(body_of(&values).unwrap(), vec![0x81, 0x59, 0x00, 0x01, 7]);
    }

    #[test]
    fn container_limits() {
        assert!(matches!(
            body_of(&ints(&[0; 0x18])),
            Err(ConfigError::UnsupportedValue(_))
        ));
        assert!(body_of(&ints(&[0; 0x17])).is_ok());

        let mut dict = crate::multitouch::plist::Dict::new();
        for i in 0..0x10 {
            dict.insert(format!("k{}", i), Rc::new(Value::Integer(i)));
        }
        assert!(matches!(
            body_of(&[Rc::new(Value::Dict(dict))]),
            Err(ConfigError::UnsupportedValue(_))
        ));

        assert!(matches!(
            body_of(&[Rc::new(Value::Real(1.0))]),
            Err(ConfigError::UnsupportedValue(_))
        ));
    }

    const CONFIG: &str = r#"<array>
        <dict>
            <key>Type</key><string>Config</string>
            <key>Config</key><dict>
                <key>Interface Config</key><array>
                    <dict>
                        <key>bInterfaceNumber</key><integer>5</integer>
                        <key>x</key><true/>
                    </dict>
                    <dict>
                        <key>HIDRecorder Descriptor</key><data>qrs=</data>
                        <key>bInterfaceNumber</key><integer>2</integer>
                    </dict>
                </array>
            </dict>
        </dict>
    </array>"#;

    #[test]
    fn interface_placeholder() {
        let config = from_xml(CONFIG).unwrap();
        let out = encode(config.as_array().unwrap()).unwrap();
        let (header, body) = out.split_at(HEADER_LEN);

        assert_eq!(&header[..4], b"HIDF");
        assert_eq!(&header[4..8], &1u32.to_le_bytes());
        assert_eq!(&header[8..12], &32u32.to_le_bytes());
        assert_eq!(&header[12..16], &117u32.to_le_bytes());
        assert_eq!(&header[16..20], &63u32.to_le_bytes());
        assert_eq!(&header[20..], &[0u8; 12]);

        assert_eq!(body.len(), 117);
        assert_eq!(&body[45..63], b"\x71bInterfaceNumber\x00");
        assert_eq!(body[63], 0x00);
        assert_eq!(&body[64..68], &[0x62, b'x', 0x00, 0xf5]);
        // Recorder interface keeps its number, its descriptor is aligned
        assert_eq!(&body[93..98], &[0x59, 0x00, 0x02, 0xaa, 0xbb]);
        assert_eq!(body[116], 0x02);
    }

    #[test]
    fn interface_number_added() {
        let config = from_xml(
            r#"<array><dict>
                <key>Type</key><string>Config</string>
                <key>Config</key><dict>
                    <key>Interface Config</key><array><dict/></array>
                </dict>
            </dict></array>"#,
        )
        .unwrap();
        let out = encode(config.as_array().unwrap()).unwrap();
        let body = &out[HEADER_LEN..];

        let offset = u32::from_le_bytes(out[16..20].try_into().unwrap()) as usize;
        assert_eq!(body[offset], 0x00);
        assert_eq!(&body[offset - 18..offset], b"\x71bInterfaceNumber\x00");
        assert_eq!(offset, body.len() - 1);
    }

    #[test]
    fn interface_number_count() {
        let none = from_xml(r#"<array><dict><key>Type</key><string>Binary</string></dict></array>"#)
            .unwrap();
        assert!(matches!(
            encode(none.as_array().unwrap()),
            Err(ConfigError::MalformedConfig(_))
        ));

        let twice = from_xml(
            r#"<array><dict>
                <key>Type</key><string>Config</string>
                <key>Config</key><dict>
                    <key>Interface Config</key><array><dict/><dict/></array>
                </dict>
            </dict></array>"#,
        )
        .unwrap();
        assert!(matches!(
            encode(twice.as_array().unwrap()),
            Err(ConfigError::MalformedConfig(_))
        ));
    }
}
