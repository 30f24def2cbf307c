use wiremod_core::pdu::{Request, Response};

/// Addressing shared by every encoding.
///
/// Serial encodings have no transaction id on the wire and always carry 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AduHeader {
    pub transaction_id: u16,
    pub unit_id: u8,
}

impl AduHeader {
    pub const fn new(transaction_id: u16, unit_id: u8) -> Self {
        Self {
            transaction_id,
            unit_id,
        }
    }

    pub const fn serial(unit_id: u8) -> Self {
        Self::new(0, unit_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu {
    pub header: AduHeader,
    pub request: Request,
}

impl RequestAdu {
    pub fn new(unit_id: u8, request: Request) -> Self {
        Self {
            header: AduHeader::serial(unit_id),
            request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub header: AduHeader,
    pub response: Response,
}
