//! Parsing of the textual packet records fed to the validator
//!
//! A record is `src:dst:type[:payload]`. Parsing is best-effort and infallible: fields
//! missing from a malformed record degrade to empty strings, which then fail the message
//! type or connection existence checks downstream and surface as ordinary rejections
//! rather than errors.

/// Borrowed view of one colon-delimited packet record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Address the record claims to originate from
    pub src: &'a str,
    /// Address the record is addressed to
    pub dst: &'a str,
    /// Raw message type field, not yet validated
    pub kind: &'a str,
    /// Everything after the third delimiter, verbatim, if a fourth field exists
    ///
    /// `Some("")` (the record ends in a delimiter) and `None` (no fourth field at all) are
    /// distinct: the former is an empty payload, the latter a bare control packet.
    pub payload: Option<&'a str>,
}

impl<'a> Packet<'a> {
    /// Split a record into its fields
    ///
    /// The payload is not re-split: delimiters past the third are part of the payload.
    pub fn parse(record: &'a str) -> Self {
        let mut fields = record.splitn(4, ':');
        Self {
            src: fields.next().unwrap_or(""),
            dst: fields.next().unwrap_or(""),
            kind: fields.next().unwrap_or(""),
            payload: fields.next(),
        }
    }
}

/// Message types understood by the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Open a connection from the record's source to its destination
    Open,
    /// Acknowledge an open connection, addressed opposite to the connection's direction
    Ack,
    /// Carry payload bytes on an open connection
    Data,
    /// Close an open connection
    Close,
}

impl MessageType {
    /// Decode the wire representation of a message type
    ///
    /// Anything but the exact single-letter codes yields `None`, which the validator
    /// rejects.
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "O" => Self::Open,
            "A" => Self::Ack,
            "D" => Self::Data,
            "C" => Self::Close,
            _ => return None,
        })
    }
}
