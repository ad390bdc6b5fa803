//! buffers for use when writing and reading dns packets

use derive_more::{Display, Error};

/// Maximum number of compression pointers followed while reading one name
const MAX_JUMPS: usize = 5;

/// Maximum length of a single label
const MAX_LABEL_LEN: usize = 0x3F;

#[derive(Debug, Display, Error)]
pub enum BufferError {
    EndOfBuffer,
    JumpLimitExceeded,
    LabelTooLong,
    InvalidEscape,
}

type Result<T> = std::result::Result<T, BufferError>;

pub trait PacketBuffer {
    fn read(&mut self) -> Result<u8>;
    fn get(&mut self, pos: usize) -> Result<u8>;
    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]>;
    fn write(&mut self, val: u8) -> Result<()>;
    fn set(&mut self, pos: usize, val: u8) -> Result<()>;
    fn pos(&self) -> usize;
    fn seek(&mut self, pos: usize) -> Result<()>;
    fn step(&mut self, steps: usize) -> Result<()>;

    fn write_u8(&mut self, val: u8) -> Result<()> {
        self.write(val)?;

        Ok(())
    }

    fn write_u16(&mut self, val: u16) -> Result<()> {
        self.write((val >> 8) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_u32(&mut self, val: u32) -> Result<()> {
        self.write(((val >> 24) & 0xFF) as u8)?;
        self.write(((val >> 16) & 0xFF) as u8)?;
        self.write(((val >> 8) & 0xFF) as u8)?;
        self.write((val & 0xFF) as u8)?;

        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        for b in bytes {
            self.write(*b)?;
        }

        Ok(())
    }

    /// Write a name as uncompressed labels followed by the root label
    ///
    /// The name is in the escaped text form produced by `read_qname`, so
    /// `\.` and `\DDD` inside a label stand for the raw byte.
    fn write_qname(&mut self, qname: &str) -> Result<()> {
        for label in split_labels(qname)? {
            if label.len() > MAX_LABEL_LEN {
                return Err(BufferError::LabelTooLong);
            }

            self.write_u8(label.len() as u8)?;
            self.write_bytes(&label)?;
        }

        self.write_u8(0)?;

        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16> {
        let res = ((self.read()? as u16) << 8) | (self.read()? as u16);

        Ok(res)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let res = ((self.read()? as u32) << 24)
            | ((self.read()? as u32) << 16)
            | ((self.read()? as u32) << 8)
            | (self.read()? as u32);

        Ok(res)
    }

    /// Read a name, following compression pointers
    ///
    /// Labels are appended to `outstr` separated by dots. A length byte with
    /// both top bits set is a pointer: the low 14 bits give an absolute offset
    /// where the rest of the name lives. Each pointer is followed once, chains
    /// are allowed up to `MAX_JUMPS` hops. The buffer position ends up just
    /// past the name as it appears at the starting position, no matter how
    /// many jumps were taken.
    fn read_qname(&mut self, outstr: &mut String) -> Result<()> {
        let mut pos = self.pos();
        let mut jumped = false;
        let mut jumps_performed = 0;

        let mut delim = "";
        loop {
            let len = self.get(pos)?;

            if (len & 0xC0) == 0xC0 {
                if jumps_performed == MAX_JUMPS {
                    return Err(BufferError::JumpLimitExceeded);
                }

                if !jumped {
                    self.seek(pos + 2)?;
                }

                let b2 = self.get(pos + 1)? as u16;
                let offset = (((len as u16) ^ 0xC0) << 8) | b2;
                pos = offset as usize;
                jumped = true;
                jumps_performed += 1;
                continue;
            }

            if len as usize > MAX_LABEL_LEN {
                return Err(BufferError::LabelTooLong);
            }

            pos += 1;

            if len == 0 {
                break;
            }

            outstr.push_str(delim);

            let str_buffer = self.get_range(pos, len as usize)?;
            escape_label(str_buffer, outstr);

            delim = ".";

            pos += len as usize;
        }

        if !jumped {
            self.seek(pos)?;
        }

        Ok(())
    }
}

/// Append a label in text form
///
/// Printable ASCII is kept as is. `.` and `\` are backslash escaped and every
/// other byte is written as `\DDD`, so distinct wire labels never share a
/// text form.
fn escape_label(label: &[u8], out: &mut String) {
    for &b in label {
        match b {
            b'.' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x21..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
}

/// Split an escaped name into raw labels, skipping empty ones
fn split_labels(name: &str) -> Result<Vec<Vec<u8>>> {
    let bytes = name.as_bytes();
    let mut labels = Vec::new();
    let mut label = Vec::new();

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                if !label.is_empty() {
                    labels.push(std::mem::take(&mut label));
                }
                i += 1;
            }
            b'\\' => {
                let digits = bytes.get(i + 1..i + 4).filter(|d| d.iter().all(u8::is_ascii_digit));
                match (digits, bytes.get(i + 1)) {
                    (Some(d), _) => {
                        let value = d.iter().fold(0u16, |acc, x| acc * 10 + (x - b'0') as u16);
                        if value > 0xFF {
                            return Err(BufferError::InvalidEscape);
                        }
                        label.push(value as u8);
                        i += 4;
                    }
                    (None, Some(&c)) => {
                        label.push(c);
                        i += 2;
                    }
                    (None, None) => return Err(BufferError::InvalidEscape),
                }
            }
            b => {
                label.push(b);
                i += 1;
            }
        }
    }

    if !label.is_empty() {
        labels.push(label);
    }

    Ok(labels)
}

/// A growable buffer over a complete message
///
/// Reads are bounds checked against the bytes actually present, so a length
/// field pointing past the end of a datagram surfaces as `EndOfBuffer`
/// instead of reading padding.
#[derive(Clone, Debug, Default)]
pub struct VectorPacketBuffer {
    pub buffer: Vec<u8>,
    pub pos: usize,
}

impl VectorPacketBuffer {
    pub fn new() -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: Vec::new(),
            pos: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> VectorPacketBuffer {
        VectorPacketBuffer {
            buffer: data.to_vec(),
            pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl PacketBuffer for VectorPacketBuffer {
    fn read(&mut self) -> Result<u8> {
        let res = *self.buffer.get(self.pos).ok_or(BufferError::EndOfBuffer)?;
        self.pos += 1;

        Ok(res)
    }

    fn get(&mut self, pos: usize) -> Result<u8> {
        self.buffer.get(pos).copied().ok_or(BufferError::EndOfBuffer)
    }

    fn get_range(&mut self, start: usize, len: usize) -> Result<&[u8]> {
        let end = start.checked_add(len).ok_or(BufferError::EndOfBuffer)?;
        self.buffer.get(start..end).ok_or(BufferError::EndOfBuffer)
    }

    fn write(&mut self, val: u8) -> Result<()> {
        if self.pos == self.buffer.len() {
            self.buffer.push(val);
        } else {
            self.set(self.pos, val)?;
        }
        self.pos += 1;

        Ok(())
    }

    fn set(&mut self, pos: usize, val: u8) -> Result<()> {
        let slot = self.buffer.get_mut(pos).ok_or(BufferError::EndOfBuffer)?;
        *slot = val;

        Ok(())
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buffer.len() {
            return Err(BufferError::EndOfBuffer);
        }
        self.pos = pos;

        Ok(())
    }

    fn step(&mut self, steps: usize) -> Result<()> {
        let pos = self.pos.checked_add(steps).ok_or(BufferError::EndOfBuffer)?;
        self.seek(pos)
    }
}
