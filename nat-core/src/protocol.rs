//! The closed operation/result enumeration exchanged over the control
//! channel, and its line-oriented string spelling.

use crate::error::{NatError, Result};

/// One step of the traversal script, sent server → client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Bind,
    AnnounceAddr,
    UpdateAddr,
    SendHello,
    WaitHello,
    Finish,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Bind => "BIND",
            Operation::AnnounceAddr => "ANNOUNCE_ADDR",
            Operation::UpdateAddr => "UPDATE_ADDR",
            Operation::SendHello => "SEND_HELLO",
            Operation::WaitHello => "WAIT_HELLO",
            Operation::Finish => "FINISH",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "BIND" => Ok(Operation::Bind),
            "ANNOUNCE_ADDR" => Ok(Operation::AnnounceAddr),
            "UPDATE_ADDR" => Ok(Operation::UpdateAddr),
            "SEND_HELLO" => Ok(Operation::SendHello),
            "WAIT_HELLO" => Ok(Operation::WaitHello),
            "FINISH" => Ok(Operation::Finish),
            other => Err(NatError::Protocol(format!("unknown operation {other:?}"))),
        }
    }
}

/// The acknowledgement of one `Operation`, sent client → server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationResult {
    Ok,
    Fail,
}

impl OperationResult {
    pub const fn as_str(self) -> &'static str {
        match self {
            OperationResult::Ok => "OK",
            OperationResult::Fail => "FAIL",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "OK" => Ok(OperationResult::Ok),
            "FAIL" => Ok(OperationResult::Fail),
            other => Err(NatError::Protocol(format!("unknown result {other:?}"))),
        }
    }

    pub fn from_bool(ok: bool) -> Self {
        if ok {
            OperationResult::Ok
        } else {
            OperationResult::Fail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_round_trips_through_its_spelling() {
        let all = [
            Operation::Bind,
            Operation::AnnounceAddr,
            Operation::UpdateAddr,
            Operation::SendHello,
            Operation::WaitHello,
            Operation::Finish,
        ];
        for op in all {
            assert_eq!(Operation::parse(op.as_str()).unwrap(), op);
        }
    }

    #[test]
    fn result_round_trips_through_its_spelling() {
        for r in [OperationResult::Ok, OperationResult::Fail] {
            assert_eq!(OperationResult::parse(r.as_str()).unwrap(), r);
        }
    }

    #[test]
    fn unknown_line_is_protocol_error() {
        assert!(Operation::parse("BOGUS").is_err());
        assert!(OperationResult::parse("MAYBE").is_err());
    }
}
