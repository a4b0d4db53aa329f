//! Binary field codec for ledger transactions
//!
//! A transaction is serialized as its fields sorted by (type code, field
//! code). Each field starts with a one to three byte header:
//!
//! - type < 16, field < 16: `type << 4 | field`
//! - type >= 16, field < 16: `field`, `type`
//! - type < 16, field >= 16: `type << 4`, `field`
//! - both >= 16: `0`, `type`, `field`
//!
//! Blobs and account ids carry a variable-length prefix. Native amounts are
//! 64-bit drops with the "positive" bit set.

use serde_json::{Map, Value};

use crate::keys::{decode_address, encode_address};
use crate::transaction::TransactionError;

const NATIVE_POSITIVE: u64 = 0x4000_0000_0000_0000;
const NATIVE_FLAGS: u64 = 0xC000_0000_0000_0000;

/// Largest native amount, in drops
pub const MAX_DROPS: u64 = 100_000_000_000_000_000;

const MAX_VL_LEN: usize = 918_744;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    UInt16,
    UInt32,
    UInt64,
    Amount,
    Blob,
    AccountId,
    UInt8,
}

impl Kind {
    fn type_code(self) -> u8 {
        match self {
            Kind::UInt16 => 1,
            Kind::UInt32 => 2,
            Kind::UInt64 => 3,
            Kind::Amount => 6,
            Kind::Blob => 7,
            Kind::AccountId => 8,
            Kind::UInt8 => 16,
        }
    }
}

#[derive(Debug)]
struct Field {
    name: &'static str,
    kind: Kind,
    nth: u8,
    signing: bool,
}

impl Field {
    const fn new(name: &'static str, kind: Kind, nth: u8) -> Self {
        Self {
            name,
            kind,
            nth,
            signing: true,
        }
    }

    fn order(&self) -> (u8, u8) {
        (self.kind.type_code(), self.nth)
    }
}

static FIELDS: &[Field] = &[
    Field::new("TransactionType", Kind::UInt16, 2),
    Field::new("TransferFee", Kind::UInt16, 4),
    Field::new("Flags", Kind::UInt32, 2),
    Field::new("Sequence", Kind::UInt32, 4),
    Field::new("DestinationTag", Kind::UInt32, 14),
    Field::new("LastLedgerSequence", Kind::UInt32, 27),
    Field::new("MaximumAmount", Kind::UInt64, 24),
    Field::new("Amount", Kind::Amount, 1),
    Field::new("Fee", Kind::Amount, 8),
    Field::new("SigningPubKey", Kind::Blob, 3),
    Field {
        name: "TxnSignature",
        kind: Kind::Blob,
        nth: 4,
        signing: false,
    },
    Field::new("Domain", Kind::Blob, 7),
    Field::new("MPTokenMetadata", Kind::Blob, 30),
    Field::new("Account", Kind::AccountId, 1),
    Field::new("Destination", Kind::AccountId, 3),
    Field::new("AssetScale", Kind::UInt8, 5),
];

static TRANSACTION_TYPES: &[(&str, u16)] = &[
    ("Payment", 0),
    ("AccountSet", 3),
    ("MPTokenIssuanceCreate", 54),
];

fn malformed(message: impl Into<String>) -> TransactionError {
    TransactionError::MalformedBlob(message.into())
}

fn field_by_name(name: &str) -> Result<&'static Field, TransactionError> {
    FIELDS
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| malformed(format!("unknown field {}", name)))
}

fn field_by_code(type_code: u8, nth: u8) -> Result<&'static Field, TransactionError> {
    FIELDS
        .iter()
        .find(|f| f.order() == (type_code, nth))
        .ok_or_else(|| malformed(format!("unknown field code {}/{}", type_code, nth)))
}

/// Serialize every field of `tx`.
pub fn encode(tx: &Map<String, Value>) -> Result<Vec<u8>, TransactionError> {
    encode_fields(tx, false)
}

/// Serialize the fields covered by the signature (everything but
/// `TxnSignature`).
pub fn encode_for_signing(tx: &Map<String, Value>) -> Result<Vec<u8>, TransactionError> {
    encode_fields(tx, true)
}

fn encode_fields(tx: &Map<String, Value>, signing: bool) -> Result<Vec<u8>, TransactionError> {
    let mut fields = tx
        .iter()
        .map(|(name, value)| field_by_name(name).map(|field| (field, value)))
        .collect::<Result<Vec<_>, _>>()?;
    fields.sort_by_key(|(field, _)| field.order());

    let mut out = Vec::with_capacity(256);
    for (field, value) in fields {
        if signing && !field.signing {
            continue;
        }
        write_header(field, &mut out);
        write_value(field, value, &mut out)?;
    }
    Ok(out)
}

fn write_header(field: &Field, out: &mut Vec<u8>) {
    let (type_code, nth) = field.order();
    match (type_code < 16, nth < 16) {
        (true, true) => out.push(type_code << 4 | nth),
        (false, true) => out.extend_from_slice(&[nth, type_code]),
        (true, false) => out.extend_from_slice(&[type_code << 4, nth]),
        (false, false) => out.extend_from_slice(&[0, type_code, nth]),
    }
}

fn write_length(len: usize, out: &mut Vec<u8>) -> Result<(), TransactionError> {
    if len <= 192 {
        out.push(len as u8);
    } else if len <= 12_480 {
        let len = len - 193;
        out.extend_from_slice(&[193 + (len >> 8) as u8, (len & 0xff) as u8]);
    } else if len <= MAX_VL_LEN {
        let len = len - 12_481;
        out.extend_from_slice(&[
            241 + (len >> 16) as u8,
            ((len >> 8) & 0xff) as u8,
            (len & 0xff) as u8,
        ]);
    } else {
        return Err(malformed(format!("field of {} bytes is too long", len)));
    }
    Ok(())
}

fn unsigned(field: &Field, value: &Value, max: u64) -> Result<u64, TransactionError> {
    value
        .as_u64()
        .filter(|n| *n <= max)
        .ok_or_else(|| malformed(format!("{} must be an integer up to {}", field.name, max)))
}

fn decimal(field: &Field, value: &Value) -> Result<u64, TransactionError> {
    value
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| malformed(format!("{} must be a decimal string", field.name)))
}

fn hex_string(field: &Field, value: &Value) -> Result<Vec<u8>, TransactionError> {
    value
        .as_str()
        .and_then(|s| hex::decode(s).ok())
        .ok_or_else(|| malformed(format!("{} must be hex", field.name)))
}

fn write_value(field: &Field, value: &Value, out: &mut Vec<u8>) -> Result<(), TransactionError> {
    match field.kind {
        Kind::UInt8 => out.push(unsigned(field, value, u8::MAX.into())? as u8),
        Kind::UInt16 if field.name == "TransactionType" => {
            let name = value.as_str().unwrap_or_default();
            let code = TRANSACTION_TYPES
                .iter()
                .find(|(kind, _)| *kind == name)
                .map(|(_, code)| *code)
                .ok_or_else(|| malformed(format!("unknown transaction type {}", value)))?;
            out.extend_from_slice(&code.to_be_bytes());
        }
        Kind::UInt16 => {
            let n = unsigned(field, value, u16::MAX.into())? as u16;
            out.extend_from_slice(&n.to_be_bytes());
        }
        Kind::UInt32 => {
            let n = unsigned(field, value, u32::MAX.into())? as u32;
            out.extend_from_slice(&n.to_be_bytes());
        }
        Kind::UInt64 => out.extend_from_slice(&decimal(field, value)?.to_be_bytes()),
        Kind::Amount => {
            let drops = decimal(field, value)?;
            if drops > MAX_DROPS {
                return Err(malformed(format!("{} exceeds the native supply", field.name)));
            }
            out.extend_from_slice(&(drops | NATIVE_POSITIVE).to_be_bytes());
        }
        Kind::Blob => {
            let bytes = hex_string(field, value)?;
            write_length(bytes.len(), out)?;
            out.extend_from_slice(&bytes);
        }
        Kind::AccountId => {
            let address = value.as_str().unwrap_or_default();
            let id = decode_address(address)
                .map_err(|e| malformed(format!("{}: {}", field.name, e)))?;
            write_length(id.len(), out)?;
            out.extend_from_slice(&id);
        }
    }
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TransactionError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| malformed("truncated"))?;
        let bytes = self.bytes;
        let slice = &bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, TransactionError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TransactionError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn header(&mut self) -> Result<(u8, u8), TransactionError> {
        let first = self.byte()?;
        let mut type_code = first >> 4;
        let mut nth = first & 0x0f;
        if type_code == 0 {
            type_code = self.byte()?;
        }
        if nth == 0 {
            nth = self.byte()?;
        }
        Ok((type_code, nth))
    }

    fn length(&mut self) -> Result<usize, TransactionError> {
        let b0 = self.byte()? as usize;
        match b0 {
            0..=192 => Ok(b0),
            193..=240 => {
                let b1 = self.byte()? as usize;
                Ok(193 + (b0 - 193) * 256 + b1)
            }
            241..=254 => {
                let b1 = self.byte()? as usize;
                let b2 = self.byte()? as usize;
                Ok(12_481 + (b0 - 241) * 65_536 + b1 * 256 + b2)
            }
            _ => Err(malformed("invalid length prefix")),
        }
    }
}

/// Parse a serialized transaction back into its JSON form.
///
/// Fields must appear in canonical order, each at most once.
pub fn decode(bytes: &[u8]) -> Result<Map<String, Value>, TransactionError> {
    let mut reader = Reader { bytes, pos: 0 };
    let mut tx = Map::new();
    let mut last: Option<(u8, u8)> = None;

    while !reader.is_empty() {
        let (type_code, nth) = reader.header()?;
        let field = field_by_code(type_code, nth)?;
        if last.is_some_and(|prev| prev >= field.order()) {
            return Err(malformed(format!("{} is out of order", field.name)));
        }
        last = Some(field.order());

        let value = read_value(field, &mut reader)?;
        tx.insert(field.name.to_string(), value);
    }
    Ok(tx)
}

fn read_value(field: &Field, reader: &mut Reader<'_>) -> Result<Value, TransactionError> {
    let value = match field.kind {
        Kind::UInt8 => reader.byte()?.into(),
        Kind::UInt16 if field.name == "TransactionType" => {
            let code = u16::from_be_bytes(reader.array()?);
            TRANSACTION_TYPES
                .iter()
                .find(|(_, c)| *c == code)
                .map(|(name, _)| Value::from(*name))
                .ok_or_else(|| malformed(format!("unknown transaction type code {}", code)))?
        }
        Kind::UInt16 => u16::from_be_bytes(reader.array()?).into(),
        Kind::UInt32 => u32::from_be_bytes(reader.array()?).into(),
        Kind::UInt64 => u64::from_be_bytes(reader.array()?).to_string().into(),
        Kind::Amount => {
            let raw = u64::from_be_bytes(reader.array()?);
            if raw & NATIVE_FLAGS != NATIVE_POSITIVE {
                return Err(malformed(format!("{} is not a native amount", field.name)));
            }
            (raw & !NATIVE_FLAGS).to_string().into()
        }
        Kind::Blob => {
            let len = reader.length()?;
            hex::encode_upper(reader.take(len)?).into()
        }
        Kind::AccountId => {
            let len = reader.length()?;
            if len != 20 {
                return Err(malformed(format!("{} has {} bytes", field.name, len)));
            }
            encode_address(&reader.array()?).into()
        }
    };
    Ok(value)
}
