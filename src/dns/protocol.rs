//! implements the DNS wire format in a transport agnostic fashion
//!
//! Parsing keeps the original message bytes around and describes each
//! resource record as a view into them, so that records can be cached and
//! replayed verbatim while their fields stay readable.

use std::net::Ipv4Addr;
use std::ops::Range;

use derive_more::{Display, Error, From};
use serde_derive::{Deserialize, Serialize};

use crate::dns::buffer::{BufferError, PacketBuffer, VectorPacketBuffer};

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    Buffer(BufferError),
    #[from(ignore)]
    TruncatedHeader,
    #[from(ignore)]
    MissingQuestion,
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// Size of the fixed message header
pub const HEADER_LEN: usize = 12;

/// The Internet class
pub const CLASS_IN: u16 = 1;

/// `QueryType` represents the requested Record Type of a query
///
/// Only the types the relay gives bespoke handling, plus AAAA so glue
/// sections can be told apart and OPT so it is never replayed, get a named
/// variant. Everything else keeps
/// its numeric code in `Unknown`.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Ptr,   // 12
    Aaaa,  // 28
    Opt,   // 41
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Ptr => 12,
            QueryType::Aaaa => 28,
            QueryType::Opt => 41,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            12 => QueryType::Ptr,
            28 => QueryType::Aaaa,
            41 => QueryType::Opt,
            _ => QueryType::Unknown(num),
        }
    }
}

/// The result code for a DNS query, as described in the specification
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    /// Header for a reply rebuilt from the cache
    ///
    /// The flags always read 0x8500: response, authoritative, recursion
    /// desired, no error. One question is echoed and the authority section
    /// is left empty.
    pub fn cached_response(id: u16, counts: ResponseCounts) -> DnsHeader {
        DnsHeader {
            id,
            response: true,
            authoritative_answer: true,
            recursion_desired: true,
            rescode: ResultCode::NOERROR,
            questions: 1,
            answers: counts.answers,
            authoritative_entries: 0,
            resource_entries: counts.additional,
            ..DnsHeader::default()
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.checking_disabled = (b & (1 << 4)) > 0;
        self.authed_data = (b & (1 << 5)) > 0;
        self.z = (b & (1 << 6)) > 0;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub class: u16,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            class: CLASS_IN,
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.class)?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        self.class = buffer.read_u16()?;

        Ok(())
    }
}

/// Decode the first question of a message
///
/// Returns the question together with the offset just past it.
pub fn decode_question(message: &[u8]) -> Result<(DnsQuestion, usize)> {
    if message.len() < HEADER_LEN {
        return Err(ProtocolError::TruncatedHeader);
    }

    let mut buffer = VectorPacketBuffer::from_bytes(message);
    let mut header = DnsHeader::new();
    header.read(&mut buffer)?;
    if header.questions == 0 {
        return Err(ProtocolError::MissingQuestion);
    }

    let mut question = DnsQuestion::new(String::new(), QueryType::Unknown(0));
    question.read(&mut buffer)?;

    Ok((question, buffer.pos()))
}

/// The message section a record was found in
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

/// A resource record located inside a parsed message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordView {
    pub domain: String,
    pub rtype: QueryType,
    pub class: u16,
    pub ttl: u32,
    pub section: Section,
    /// Byte range of the whole record, owner name included
    pub range: Range<usize>,
    /// Byte range of the record data
    pub rdata: Range<usize>,
}

impl RecordView {
    fn read(buffer: &mut VectorPacketBuffer, section: Section) -> Result<RecordView> {
        let start = buffer.pos();

        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let rtype = QueryType::from_num(buffer.read_u16()?);
        let class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()? as usize;

        let rdata_start = buffer.pos();
        buffer.step(data_len)?;

        Ok(RecordView {
            domain,
            rtype,
            class,
            ttl,
            section,
            range: start..buffer.pos(),
            rdata: rdata_start..buffer.pos(),
        })
    }
}

/// A parsed message that still owns its wire bytes
#[derive(Clone, Debug)]
pub struct DnsMessage {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub records: Vec<RecordView>,
    bytes: Vec<u8>,
}

impl DnsMessage {
    /// Parse a complete message
    ///
    /// Records are walked from the end of the question section until the
    /// cursor reaches the end of the datagram. The header counts only decide
    /// which section each record belongs to; anything past the counted
    /// records is treated as additional data.
    pub fn parse(data: &[u8]) -> Result<DnsMessage> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader);
        }

        let mut buffer = VectorPacketBuffer::from_bytes(data);
        let mut header = DnsHeader::new();
        header.read(&mut buffer)?;

        let mut questions = Vec::new();
        for _ in 0..header.questions {
            let mut question = DnsQuestion::new(String::new(), QueryType::Unknown(0));
            question.read(&mut buffer)?;
            questions.push(question);
        }

        let answers = header.answers as usize;
        let authorities = answers + header.authoritative_entries as usize;

        let mut records = Vec::new();
        while buffer.pos() < buffer.len() {
            let idx = records.len();
            let section = if idx < answers {
                Section::Answer
            } else if idx < authorities {
                Section::Authority
            } else {
                Section::Additional
            };

            records.push(RecordView::read(&mut buffer, section)?);
        }

        Ok(DnsMessage {
            header,
            questions,
            records,
            bytes: buffer.into_inner(),
        })
    }

    pub fn raw(&self, record: &RecordView) -> &[u8] {
        &self.bytes[record.range.clone()]
    }

    /// Records replayed on a cache hit
    ///
    /// That is the answer section followed by the additional section, in
    /// message order. Authority records are left out because rebuilt replies
    /// carry an empty authority section, and OPT belongs to a single exchange.
    fn replayed(&self) -> impl Iterator<Item = &RecordView> + '_ {
        self.records
            .iter()
            .filter(|rec| rec.section != Section::Authority && rec.rtype != QueryType::Opt)
    }

    /// The replayed records as undecoded byte blocks, in order
    pub fn extract_records(&self) -> Vec<Vec<u8>> {
        self.replayed().map(|rec| self.raw(rec).to_vec()).collect()
    }

    /// How many of the blocks from `extract_records` are answers
    pub fn answer_count(&self) -> usize {
        self.replayed()
            .filter(|rec| rec.section == Section::Answer)
            .count()
    }

    /// TTL of the first record following the question section
    pub fn first_ttl(&self) -> Option<u32> {
        self.records.first().map(|rec| rec.ttl)
    }

    pub fn records_in(&self, section: Section) -> impl Iterator<Item = &RecordView> + '_ {
        self.records.iter().filter(move |rec| rec.section == section)
    }

    pub fn records_of(
        &self,
        section: Section,
        rtype: QueryType,
    ) -> impl Iterator<Item = &RecordView> + '_ {
        self.records
            .iter()
            .filter(move |rec| rec.section == section && rec.rtype == rtype)
    }

    /// Decode a possibly compressed name starting at an arbitrary offset
    pub fn decode_name_at(&self, offset: usize) -> Result<String> {
        let mut buffer = VectorPacketBuffer::from_bytes(&self.bytes);
        buffer.seek(offset)?;

        let mut name = String::new();
        buffer.read_qname(&mut name)?;

        Ok(name)
    }

    /// The name carried in the data of a NS, CNAME or PTR record
    pub fn target_name(&self, record: &RecordView) -> Result<String> {
        self.decode_name_at(record.rdata.start)
    }

    /// The address carried by an A record
    pub fn address(&self, record: &RecordView) -> Option<Ipv4Addr> {
        if record.rtype != QueryType::A {
            return None;
        }

        match &self.bytes[record.rdata.clone()] {
            &[a, b, c, d] => Some(Ipv4Addr::new(a, b, c, d)),
            _ => None,
        }
    }
}

/// An A record written out in full, without name compression
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressRecord {
    pub domain: String,
    pub addr: Ipv4Addr,
    pub class: u16,
    pub ttl: u32,
}

impl AddressRecord {
    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        buffer.write_qname(&self.domain)?;
        buffer.write_u16(QueryType::A.to_num())?;
        buffer.write_u16(self.class)?;
        buffer.write_u32(self.ttl)?;
        buffer.write_u16(4)?;
        buffer.write_bytes(&self.addr.octets())?;

        Ok(buffer.pos() - start_pos)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = VectorPacketBuffer::new();
        self.write(&mut buffer)?;

        Ok(buffer.into_inner())
    }
}

/// Section counts for a reply rebuilt from cached records
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseCounts {
    pub answers: u16,
    pub additional: u16,
}

/// Build a reply from cached record blocks
///
/// The layout is header, the question section copied verbatim from the
/// request, then every block in order. Echoing the question keeps
/// compression pointers into offset 12 valid.
pub fn build_response(
    id: u16,
    question: &[u8],
    counts: ResponseCounts,
    raw_answers: &[Vec<u8>],
) -> Result<Vec<u8>> {
    let mut buffer = VectorPacketBuffer::new();

    DnsHeader::cached_response(id, counts).write(&mut buffer)?;
    buffer.write_bytes(question)?;
    for block in raw_answers {
        buffer.write_bytes(block)?;
    }

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::dns::test_packets::{a_response, a_response_with_opt};

    #[test]
    fn test_decode_question() {
        let data = a_response();
        let (question, end) = decode_question(&data).unwrap();

        assert_eq!("example.com", question.name);
        assert_eq!(QueryType::A, question.qtype);
        assert_eq!(CLASS_IN, question.class);
        assert_eq!(29, end);
    }

    #[test]
    fn test_question_reencodes_identically() {
        let data = a_response();
        let (question, end) = decode_question(&data).unwrap();

        let mut buffer = VectorPacketBuffer::new();
        question.write(&mut buffer).unwrap();

        assert_eq!(&data[HEADER_LEN..end], &buffer.buffer[..]);
    }

    #[test]
    fn test_truncated_header() {
        assert!(matches!(
            decode_question(&[0x12, 0x34, 0x01]),
            Err(ProtocolError::TruncatedHeader)
        ));
        assert!(matches!(
            DnsMessage::parse(&[0u8; 11]),
            Err(ProtocolError::TruncatedHeader)
        ));
    }

    #[test]
    fn test_label_past_end_is_malformed() {
        let mut data = a_response()[..HEADER_LEN].to_vec();
        data.extend_from_slice(&[0x20, b'a', b'b']);

        assert!(matches!(
            decode_question(&data),
            Err(ProtocolError::Buffer(BufferError::EndOfBuffer))
        ));
    }

    #[test]
    fn test_extract_records() {
        let data = a_response();
        let message = DnsMessage::parse(&data).unwrap();

        let blocks = message.extract_records();
        assert_eq!(1, blocks.len());
        assert_eq!(&data[29..], &blocks[0][..]);

        let rec = &message.records[0];
        assert_eq!("example.com", rec.domain);
        assert_eq!(Section::Answer, rec.section);
        assert_eq!(Some(300), message.first_ttl());
        assert_eq!(Some(Ipv4Addr::new(93, 184, 216, 34)), message.address(rec));
    }

    #[test]
    fn test_replayed_records_keep_their_sections() {
        let data = a_response_with_opt();
        let message = DnsMessage::parse(&data).unwrap();

        assert_eq!(3, message.records.len());
        assert_eq!(Section::Authority, message.records[1].section);
        assert_eq!(QueryType::Opt, message.records[2].rtype);

        // only the answer is replayed, authority and OPT stay behind
        let blocks = message.extract_records();
        assert_eq!(1, blocks.len());
        assert_eq!(1, message.answer_count());
        assert_eq!(message.raw(&message.records[0]), &blocks[0][..]);
    }

    #[test]
    fn test_question_with_binary_label_is_echoed() {
        let mut data = a_response()[..HEADER_LEN].to_vec();
        data.extend_from_slice(&[
            0x02, 0xFF, b'a', 0x03, b'c', b'o', b'm', 0x00, //
            0x00, 0x01, 0x00, 0x01,
        ]);

        let (question, end) = decode_question(&data).unwrap();
        assert_eq!("\\255a.com", question.name);

        let mut buffer = VectorPacketBuffer::new();
        question.write(&mut buffer).unwrap();
        assert_eq!(&data[HEADER_LEN..end], &buffer.buffer[..]);
    }

    #[test]
    fn test_record_length_past_end_is_malformed() {
        let mut data = a_response();
        // claim 5 bytes of rdata while only 4 are present
        let len = data.len();
        data[len - 5] = 0x05;

        assert!(DnsMessage::parse(&data).is_err());
    }

    #[test]
    fn test_name_with_pointer_in_rdata() {
        let mut data = a_response();
        data[7] = 0x02;
        // www.example.com CNAME pointing at the question name
        data.extend_from_slice(&[
            0x03, b'w', b'w', b'w', 0xC0, 0x0C, // owner
            0x00, 0x05, 0x00, 0x01, // CNAME IN
            0x00, 0x00, 0x00, 0x3C, // ttl 60
            0x00, 0x06, // rdlength
            0x03, b'c', b'd', b'n', 0xC0, 0x0C,
        ]);

        let message = DnsMessage::parse(&data).unwrap();
        assert_eq!(2, message.records.len());

        let cname = &message.records[1];
        assert_eq!("www.example.com", cname.domain);
        assert_eq!(QueryType::Cname, cname.rtype);
        assert_eq!("cdn.example.com", message.target_name(cname).unwrap());
        assert_eq!(None, message.address(cname));
    }

    #[test]
    fn test_build_response() {
        let data = a_response();
        let message = DnsMessage::parse(&data).unwrap();
        let (_, end) = decode_question(&data).unwrap();

        let counts = ResponseCounts {
            answers: 1,
            additional: 0,
        };
        let reply = build_response(
            0xABCD,
            &data[HEADER_LEN..end],
            counts,
            &message.extract_records(),
        )
        .unwrap();

        assert_eq!(&[0xAB, 0xCD, 0x85, 0x00], &reply[..4]);
        assert_eq!(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00], &reply[4..12]);
        assert_eq!(&data[HEADER_LEN..], &reply[HEADER_LEN..]);

        let reparsed = DnsMessage::parse(&reply).unwrap();
        assert_eq!(1, reparsed.header.answers);
        assert!(reparsed.header.response);
        assert_eq!(&data[end..], reparsed.raw(&reparsed.records[0]));
    }

    #[test]
    fn test_address_record_bytes() {
        let rec = AddressRecord {
            domain: "ns1.example.com".to_string(),
            addr: Ipv4Addr::new(10, 0, 0, 1),
            class: CLASS_IN,
            ttl: 3600,
        };

        let bytes = rec.to_bytes().unwrap();
        assert_eq!(17 + 10 + 4, bytes.len());
        assert_eq!(&[0x00, 0x01, 0x00, 0x01], &bytes[17..21]);
        assert_eq!(&[0x00, 0x00, 0x0E, 0x10, 0x00, 0x04, 10, 0, 0, 1], &bytes[21..]);
    }
}
