//! XML property lists with `ID` / `IDREF` subtree sharing
//!
//! The multitouch configs avoid repeating large subtrees: an element may
//! carry `ID="n"` and a later element `IDREF="n"` stands for the same
//! value. Decoding is two passes: the XML is read into a plain element
//! tree, which is then materialised into [`Value`]s where every reference
//! is an `Rc` clone of the node its id was given to.

use std::collections::HashMap;
use std::rc::Rc;

use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Dict(Dict),
    Array(Vec<Rc<Value>>),
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Data(Vec<u8>),
    Date(String),
}

/// Dictionary keeping document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dict(Vec<(String, Rc<Value>)>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the value in place when the key is already present.
    pub fn insert(&mut self, key: String, value: Rc<Value>) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Rc<Value>> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rc<Value>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Dict(_) => "dict",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Boolean(_) => "boolean",
            Value::Data(_) => "data",
            Value::Date(_) => "date",
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Rc<Value>]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart) -> Result<Self, ConfigError> {
        let mut attrs = vec![];
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            attrs.push((key, attr.unescape_value()?.into_owned()));
        }

        Ok(Element {
            tag: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            ..Default::default()
        })
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn close(
    element: Element,
    stack: &mut [Element],
    root: &mut Option<Element>,
) -> Result<(), ConfigError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => {
            return Err(ConfigError::MalformedConfig(
                "more than one root element".to_string(),
            ))
        }
    }
    Ok(())
}

fn parse_xml(text: &str) -> Result<Element, ConfigError> {
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = vec![];
    let mut root = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => close(Element::open(&start)?, &mut stack, &mut root)?,
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    ConfigError::MalformedConfig("unbalanced end tag".to_string())
                })?;
                close(element, &mut stack, &mut root)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ConfigError::MalformedConfig(format!(
            "unclosed <{}>",
            stack[stack.len() - 1].tag
        )));
    }
    root.ok_or_else(|| ConfigError::MalformedConfig("empty document".to_string()))
}

fn parse_integer(text: &str) -> Result<i64, ConfigError> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| ConfigError::MalformedConfig(format!("bad integer {:?}", text)))
}

#[derive(Default)]
struct Materializer {
    ids: HashMap<String, Rc<Value>>,
}

impl Materializer {
    fn value(&mut self, element: &Element) -> Result<Rc<Value>, ConfigError> {
        if let Some(id) = element.attr("IDREF") {
            return self
                .ids
                .get(id)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownReference(id.to_string()));
        }

        let value = match element.tag.as_str() {
            "dict" => Value::Dict(self.dict(element)?),
            "array" => Value::Array(
                element
                    .children
                    .iter()
                    .map(|c| self.value(c))
                    .collect::<Result<_, _>>()?,
            ),
            "string" | "key" => Value::String(element.text.clone()),
            "integer" => Value::Integer(parse_integer(&element.text)?),
            "real" => Value::Real(element.text.trim().parse().map_err(|_| {
                ConfigError::MalformedConfig(format!("bad real {:?}", element.text))
            })?),
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            "data" => {
                let b64: String = element
                    .text
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                Value::Data(base64::engine::general_purpose::STANDARD.decode(b64)?)
            }
            "date" => Value::Date(element.text.trim().to_string()),
            other => {
                return Err(ConfigError::MalformedConfig(format!(
                    "unexpected element <{}>",
                    other
                )))
            }
        };

        let value = Rc::new(value);
        if let Some(id) = element.attr("ID") {
            self.ids.insert(id.to_string(), value.clone());
        }
        Ok(value)
    }

    fn dict(&mut self, element: &Element) -> Result<Dict, ConfigError> {
        let mut dict = Dict::new();
        for pair in element.children.chunks(2) {
            let [key, value] = pair else {
                return Err(ConfigError::MalformedConfig(
                    "dict key without value".to_string(),
                ));
            };

            let key = self.value(key)?;
            let Value::String(key) = &*key else {
                return Err(ConfigError::MalformedConfig(format!(
                    "dict key is a {}",
                    key.kind()
                )));
            };
            dict.insert(key.clone(), self.value(value)?);
        }
        Ok(dict)
    }
}

/// Decode a property list document, sharing `IDREF`'d subtrees.
///
/// The document element may be `<plist>` or the top value itself.
pub fn from_xml(text: &str) -> Result<Rc<Value>, ConfigError> {
    let root = parse_xml(text)?;
    let top = if root.tag == "plist" {
        root.children
            .first()
            .ok_or_else(|| ConfigError::MalformedConfig("empty plist".to_string()))?
    } else {
        &root
    };

    Materializer::default().value(top)
}

#[cfg(test)]
mod test_plist {
    use super::*;

    #[test]
    fn scalars() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>name</key><string> spaced &amp; escaped </string>
    <key>n</key><integer>42</integer>
    <key>hex</key><integer>0x1f</integer>
    <key>neg</key><integer>-3</integer>
    <key>yes</key><true/>
    <key>no</key><false/>
    <key>blob</key><data>
        AQID
    </data>
    <key>pi</key><real>3.5</real>
    <key>when</key><date>2022-01-01T00:00:00Z</date>
</dict>
</plist>"#;
        let value = from_xml(doc).unwrap();
        let dict = value.as_dict().unwrap();

        let keys: Vec<_> = dict.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec!["name", "n", "hex", "neg", "yes", "no", "blob", "pi", "when"]
        );
        assert_eq!(dict.get("name").unwrap().as_str(), Some(" spaced & escaped "));
        assert_eq!(dict.get("n").unwrap().as_integer(), Some(42));
        assert_eq!(dict.get("hex").unwrap().as_integer(), Some(0x1f));
        assert_eq!(dict.get("neg").unwrap().as_integer(), Some(-3));
        assert_eq!(**dict.get("yes").unwrap(), Value::Boolean(true));
        assert_eq!(**dict.get("no").unwrap(), Value::Boolean(false));
        assert_eq!(dict.get("blob").unwrap().as_data(), Some(&[1u8, 2, 3][..]));
        assert_eq!(**dict.get("pi").unwrap(), Value::Real(3.5));
        assert_eq!(
            **dict.get("when").unwrap(),
            Value::Date("2022-01-01T00:00:00Z".to_string())
        );
    }

    #[test]
    fn bare_root() {
        let value = from_xml("<array><integer>1</integer><string/></array>").unwrap();
        let array = value.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[1].as_str(), Some(""));
    }

    #[test]
    fn idref_shares_node() {
        let doc = r#"<dict>
            <key ID="1">shared</key><dict ID="2"><key>a</key><integer>1</integer></dict>
            <key>again</key><dict IDREF="2"/>
            <key IDREF="1"/><string>replaced</string>
        </dict>"#;
        let value = from_xml(doc).unwrap();
        let dict = value.as_dict().unwrap();

        // The repeated key replaced the first value in place
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get("shared").unwrap().as_str(), Some("replaced"));

        let again = dict.get("again").unwrap();
        assert_eq!(again.as_dict().unwrap().get("a").unwrap().as_integer(), Some(1));
    }

    #[test]
    fn idref_is_not_a_copy() {
        let doc = r#"<array>
            <data ID="7">AAEC</data>
            <data IDREF="7"/>
        </array>"#;
        let value = from_xml(doc).unwrap();
        let array = value.as_array().unwrap();

        assert!(Rc::ptr_eq(&array[0], &array[1]));
    }

    #[test]
    fn unknown_reference() {
        let doc = r#"<array><string IDREF="9"/></array>"#;
        assert!(matches!(
            from_xml(doc),
            Err(ConfigError::UnknownReference(ref id)) if id == "9"
        ));
    }

    #[test]
    fn reference_to_ancestor() {
        let doc = r#"<array ID="1"><array IDREF="1"/></array>"#;
        assert!(matches!(
            from_xml(doc),
            Err(ConfigError::UnknownReference(_))
        ));
    }

    #[test]
    fn malformed() {
        assert!(matches!(
            from_xml("<dict><key>a</key></dict>"),
            Err(ConfigError::MalformedConfig(_))
        ));
        assert!(matches!(
            from_xml("<dict><integer>1</integer><integer>2</integer></dict>"),
            Err(ConfigError::MalformedConfig(_))
        ));
        assert!(matches!(
            from_xml("<integer>ten</integer>"),
            Err(ConfigError::MalformedConfig(_))
        ));
        assert!(matches!(
            from_xml("<plist><blob/></plist>"),
            Err(ConfigError::MalformedConfig(_))
        ));
        assert!(from_xml("<dict>").is_err());
        assert!(from_xml("").is_err());
        assert!(matches!(
            from_xml("<data>!!!</data>"),
            Err(ConfigError::Base64(_))
        ));
    }
}
