//! TWS API message encoding and decoding
//!
//! Only the messages needed for the connection handshake, deep book and
//! tick-by-tick streams are modelled. Unknown incoming ids decode to `None`.

use chrono::{DateTime, Utc};
use depthgate_core::{
    BookSide, Contract, DepthOperation, DepthUpdate, TickByTick, TickType,
};

use super::TransportEvent;
use super::wire::{FieldReader, FieldWriter};
use crate::error::TransportError;

pub const MIN_CLIENT_VERSION: i32 = 100;
pub const MAX_CLIENT_VERSION: i32 = 176;
/// Oldest server able to serve tick-by-tick with the fields we send
pub const MIN_SERVER_VERSION: i32 = 137;

/// Server versions that add fields to the messages below
pub mod server_version {
    pub const TICK_BY_TICK_IGNORE_SIZE: i32 = 140;
    pub const SMART_DEPTH: i32 = 146;
    pub const MKT_DEPTH_PRIM_EXCHANGE: i32 = 149;
}

mod outgoing {
    pub const REQ_MKT_DEPTH: i64 = 10;
    pub const CANCEL_MKT_DEPTH: i64 = 11;
    pub const REQ_IDS: i64 = 8;
    pub const START_API: i64 = 71;
    pub const REQ_TICK_BY_TICK_DATA: i64 = 97;
    pub const CANCEL_TICK_BY_TICK_DATA: i64 = 98;
}

mod incoming {
    pub const ERR_MSG: i64 = 4;
    pub const NEXT_VALID_ID: i64 = 9;
    pub const MARKET_DEPTH: i64 = 12;
    pub const MARKET_DEPTH_L2: i64 = 13;
    pub const MANAGED_ACCTS: i64 = 15;
    pub const TICK_BY_TICK: i64 = 99;
}

/// Error codes with special meaning for stream handling
pub mod codes {
    /// Deep book was reset; local copy must be discarded
    pub const DEPTH_RESET: i32 = 317;
    /// Too many concurrent deep book subscriptions
    pub const DEPTH_LIMIT: i32 = 309;
    /// Client id already connected
    pub const CLIENT_ID_IN_USE: i32 = 326;
    /// Connectivity between gateway and server lost
    pub const CONNECTIVITY_LOST: i32 = 1100;

    /// Farm status and similar notices (2100-2199)
    pub fn is_informational(code: i32) -> bool {
        (2100..2200).contains(&code)
    }
}

/// Requests the client sends after the socket is open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    StartApi {
        client_id: i32,
        optional_capabilities: String,
    },
    /// Ask for the next valid order id; the reply doubles as a readiness signal
    RequestIds,
    RequestMarketDepth {
        req_id: i64,
        contract: Contract,
        num_rows: u32,
        smart_depth: bool,
    },
    CancelMarketDepth {
        req_id: i64,
        smart_depth: bool,
    },
    RequestTickByTick {
        req_id: i64,
        contract: Contract,
        tick_type: TickType,
        number_of_ticks: u32,
        ignore_size: bool,
    },
    CancelTickByTick {
        req_id: i64,
    },
}

impl ApiRequest {
    pub fn start_api(client_id: i32) -> Self {
        ApiRequest::StartApi {
            client_id,
            optional_capabilities: String::new(),
        }
    }

    /// Encode as a complete frame for a server of `server_version`
    pub fn encode(&self, server_version: i32) -> Vec<u8> {
        let mut w = FieldWriter::new();
        match self {
            ApiRequest::StartApi {
                client_id,
                optional_capabilities,
            } => {
                w.push_int(outgoing::START_API)
                    .push_int(2)
                    .push_int(i64::from(*client_id))
                    .push_str(optional_capabilities);
            }
            ApiRequest::RequestIds => {
                w.push_int(outgoing::REQ_IDS).push_int(1).push_int(1);
            }
            ApiRequest::RequestMarketDepth {
                req_id,
                contract,
                num_rows,
                smart_depth,
            } => {
                w.push_int(outgoing::REQ_MKT_DEPTH).push_int(5).push_int(*req_id);
                w.push_int(0) // conId: resolve by symbol
                    .push_str(contract.symbol.as_str())
                    .push_str(&contract.sec_type)
                    .push_str("") // lastTradeDateOrContractMonth
                    .push_f64(0.0) // strike
                    .push_str("") // right
                    .push_str("") // multiplier
                    .push_str(&contract.exchange);
                if server_version >= server_version::MKT_DEPTH_PRIM_EXCHANGE {
                    w.push_str(contract.primary_exchange.as_deref().unwrap_or(""));
                }
                w.push_str(&contract.currency)
                    .push_str("") // localSymbol
                    .push_str("") // tradingClass
                    .push_int(i64::from(*num_rows));
                if server_version >= server_version::SMART_DEPTH {
                    w.push_bool(*smart_depth);
                }
                w.push_str(""); // mktDepthOptions
            }
            ApiRequest::CancelMarketDepth {
                req_id,
                smart_depth,
            } => {
                w.push_int(outgoing::CANCEL_MKT_DEPTH).push_int(1).push_int(*req_id);
                if server_version >= server_version::SMART_DEPTH {
                    w.push_bool(*smart_depth);
                }
            }
            ApiRequest::RequestTickByTick {
                req_id,
                contract,
                tick_type,
                number_of_ticks,
                ignore_size,
            } => {
                w.push_int(outgoing::REQ_TICK_BY_TICK_DATA)
                    .push_int(*req_id)
                    .push_int(0)
                    .push_str(contract.symbol.as_str())
                    .push_str(&contract.sec_type)
                    .push_str("")
                    .push_f64(0.0)
                    .push_str("")
                    .push_str("")
                    .push_str(&contract.exchange)
                    .push_str(contract.primary_exchange.as_deref().unwrap_or(""))
                    .push_str(&contract.currency)
                    .push_str("")
                    .push_str("")
                    .push_str(tick_type.as_wire());
                if server_version >= server_version::TICK_BY_TICK_IGNORE_SIZE {
                    w.push_int(i64::from(*number_of_ticks)).push_bool(*ignore_size);
                }
            }
            ApiRequest::CancelTickByTick { req_id } => {
                w.push_int(outgoing::CANCEL_TICK_BY_TICK_DATA).push_int(*req_id);
            }
        }
        w.finish()
    }
}

/// Decode the server's reply to the connection preamble
pub fn decode_server_hello(fields: &[String]) -> Result<TransportEvent, TransportError> {
    let mut r = FieldReader::new(fields);
    let server_version = r.next_i32()?;
    let connection_time = r.next_str().unwrap_or_default().to_string();
    if server_version < MIN_SERVER_VERSION {
        return Err(TransportError::UnsupportedServerVersion(server_version));
    }
    Ok(TransportEvent::SocketOpened {
        server_version,
        connection_time,
    })
}

/// Decode one message received after the hello
pub fn decode(
    fields: &[String],
    server_version: i32,
) -> Result<Option<TransportEvent>, TransportError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let mut r = FieldReader::new(fields);
    let msg_id = r.next_i64()?;

    let event = match msg_id {
        incoming::ERR_MSG => {
            r.skip()?; // version
            let req_id = r.next_i64()?;
            let code = r.next_i32()?;
            let message = r.next_str()?.to_string();
            TransportEvent::Error {
                req_id,
                code,
                message,
            }
        }
        incoming::NEXT_VALID_ID => {
            r.skip()?;
            TransportEvent::NextValidId(r.next_i64()?)
        }
        incoming::MANAGED_ACCTS => {
            r.skip()?;
            let accounts = r
                .next_str()?
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            TransportEvent::ManagedAccounts(accounts)
        }
        incoming::MARKET_DEPTH => {
            r.skip()?;
            let req_id = r.next_i64()?;
            let position = depth_position(r.next_i64()?)?;
            let operation = depth_operation(r.next_i32()?)?;
            let side = book_side(r.next_i32()?)?;
            let price = r.next_decimal()?;
            let size = r.next_decimal()?;
            TransportEvent::MarketDepth {
                req_id,
                update: DepthUpdate {
                    position,
                    market_maker: None,
                    operation,
                    side,
                    price,
                    size,
                },
            }
        }
        incoming::MARKET_DEPTH_L2 => {
            r.skip()?;
            let req_id = r.next_i64()?;
            let position = depth_position(r.next_i64()?)?;
            let market_maker = r.next_str()?.to_string();
            let operation = depth_operation(r.next_i32()?)?;
            let side = book_side(r.next_i32()?)?;
            let price = r.next_decimal()?;
            let size = r.next_decimal()?;
            if server_version >= server_version::SMART_DEPTH && r.remaining() > 0 {
                r.skip()?; // isSmartDepth echo
            }
            TransportEvent::MarketDepth {
                req_id,
                update: DepthUpdate {
                    position,
                    market_maker: Some(market_maker).filter(|m| !m.is_empty()),
                    operation,
                    side,
                    price,
                    size,
                },
            }
        }
        incoming::TICK_BY_TICK => {
            let req_id = r.next_i64()?;
            let tick_type = r.next_i32()?;
            let time = tick_time(r.next_i64()?)?;
            let tick = match tick_type {
                1 | 2 => {
                    let price = r.next_decimal()?;
                    let size = r.next_decimal()?;
                    let mask = r.next_i64()?;
                    TickByTick::Trade {
                        time,
                        price,
                        size,
                        exchange: r.next_str()?.to_string(),
                        special_conditions: r.next_str()?.to_string(),
                        past_limit: mask & 1 != 0,
                        unreported: mask & 2 != 0,
                    }
                }
                3 => {
                    let bid_price = r.next_decimal()?;
                    let ask_price = r.next_decimal()?;
                    let bid_size = r.next_decimal()?;
                    let ask_size = r.next_decimal()?;
                    TickByTick::BidAsk {
                        time,
                        bid_price,
                        ask_price,
                        bid_size,
                        ask_size,
                    }
                }
                4 => TickByTick::MidPoint {
                    time,
                    mid_point: r.next_decimal()?,
                },
                _ => return Ok(None),
            };
            TransportEvent::TickByTick { req_id, tick }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn depth_position(raw: i64) -> Result<usize, TransportError> {
    usize::try_from(raw).map_err(|_| TransportError::Decode(format!("negative depth position {raw}")))
}

fn depth_operation(code: i32) -> Result<DepthOperation, TransportError> {
    DepthOperation::from_code(code)
        .ok_or_else(|| TransportError::Decode(format!("unknown depth operation {code}")))
}

fn book_side(code: i32) -> Result<BookSide, TransportError> {
    BookSide::from_code(code).ok_or_else(|| TransportError::Decode(format!("unknown book side {code}")))
}

fn tick_time(secs: i64) -> Result<DateTime<Utc>, TransportError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| TransportError::Decode(format!("tick time {secs} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::wire::split_fields;
    use depthgate_core::Symbol;
    use rust_decimal_macros::dec;

    fn fields(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn encoded_fields(request: &ApiRequest, server_version: i32) -> Vec<String> {
        let frame = request.encode(server_version);
        split_fields(&frame[4..])
    }

    fn aapl() -> Contract {
        Contract::stock(Symbol::new("AAPL").unwrap())
    }

    #[test]
    fn test_start_api_and_req_ids() {
        assert_eq!(
            encoded_fields(&ApiRequest::start_api(1001), 176),
            fields(&["71", "2", "1001", ""])
        );
        assert_eq!(
            encoded_fields(&ApiRequest::RequestIds, 176),
            fields(&["8", "1", "1"])
        );
    }

    #[test]
    fn test_market_depth_request_current_server() {
        let request = ApiRequest::RequestMarketDepth {
            req_id: 7,
            contract: aapl(),
            num_rows: 10,
            smart_depth: false,
        };
        assert_eq!(
            encoded_fields(&request, 176),
            fields(&[
                "10", "5", "7", "0", "AAPL", "STK", "", "0.0", "", "", "SMART", "", "USD", "",
                "", "10", "0", ""
            ])
        );
    }

    #[test]
    fn test_market_depth_request_old_server_omits_new_fields() {
        let request = ApiRequest::RequestMarketDepth {
            req_id: 7,
            contract: aapl(),
            num_rows: 5,
            smart_depth: true,
        };
        let encoded = encoded_fields(&request, 140);
        assert_eq!(encoded.len(), 16);
        assert_eq!(encoded[10], "SMART");
        assert_eq!(encoded[11], "USD");
    }

    #[test]
    fn test_cancel_requests() {
        assert_eq!(
            encoded_fields(
                &ApiRequest::CancelMarketDepth {
                    req_id: 7,
                    smart_depth: true
                },
                176
            ),
            fields(&["11", "1", "7", "1"])
        );
        assert_eq!(
            encoded_fields(&ApiRequest::CancelTickByTick { req_id: 3 }, 176),
            fields(&["98", "3"])
        );
    }

    #[test]
    fn test_tick_by_tick_request() {
        let request = ApiRequest::RequestTickByTick {
            req_id: 3,
            contract: aapl(),
            tick_type: TickType::AllLast,
            number_of_ticks: 0,
            ignore_size: false,
        };
        let encoded = encoded_fields(&request, 176);
        assert_eq!(encoded[0], "97");
        assert_eq!(encoded[1], "3");
        assert_eq!(encoded[3], "AAPL");
        assert_eq!(&encoded[14..], &fields(&["AllLast", "0", "0"])[..]);
    }

    #[test]
    fn test_server_hello() {
        assert_eq!(
            decode_server_hello(&fields(&["176", "20260105 09:30:00 EST"])).unwrap(),
            TransportEvent::SocketOpened {
                server_version: 176,
                connection_time: "20260105 09:30:00 EST".into()
            }
        );
        assert_eq!(
            decode_server_hello(&fields(&["120", "x"])),
            Err(TransportError::UnsupportedServerVersion(120))
        );
    }

    #[test]
    fn test_decode_readiness_messages() {
        assert_eq!(
            decode(&fields(&["9", "1", "42"]), 176).unwrap(),
            Some(TransportEvent::NextValidId(42))
        );
        assert_eq!(
            decode(&fields(&["15", "1", "DU111,DU222,"]), 176).unwrap(),
            Some(TransportEvent::ManagedAccounts(vec!["DU111".into(), "DU222".into()]))
        );
    }

    #[test]
    fn test_decode_error_message() {
        let event = decode(
            &fields(&["4", "2", "7", "309", "Max number (3) of market depth requests", ""]),
            176,
        )
        .unwrap();
        assert_eq!(
            event,
            Some(TransportEvent::Error {
                req_id: 7,
                code: 309,
                message: "Max number (3) of market depth requests".into()
            })
        );
    }

    #[test]
    fn test_decode_depth_rows() {
        let event = decode(&fields(&["12", "1", "7", "0", "0", "1", "189.25", "300"]), 176)
            .unwrap()
            .unwrap();
        let TransportEvent::MarketDepth { req_id, update } = event else {
            panic!("expected depth");
        };
        assert_eq!(req_id, 7);
        assert_eq!(update.side, BookSide::Bid);
        assert_eq!(update.operation, DepthOperation::Insert);
        assert_eq!(update.price, dec!(189.25));
        assert_eq!(update.size, dec!(300));
        assert!(update.market_maker.is_none());

        let event = decode(
            &fields(&["13", "1", "8", "2", "ARCA", "2", "0", "189.30", "100", "1"]),
            176,
        )
        .unwrap()
        .unwrap();
        let TransportEvent::MarketDepth { update, .. } = event else {
            panic!("expected depth");
        };
        assert_eq!(update.position, 2);
        assert_eq!(update.market_maker.as_deref(), Some("ARCA"));
        assert_eq!(update.operation, DepthOperation::Delete);
        assert_eq!(update.side, BookSide::Ask);
    }

    #[test]
    fn test_decode_bad_depth_side_is_error() {
        assert!(decode(&fields(&["12", "1", "7", "0", "0", "5", "1", "1"]), 176).is_err());
    }

    #[test]
    fn test_decode_tick_by_tick_variants() {
        let trade = decode(
            &fields(&["99", "3", "2", "1767623400", "189.5", "25", "2", "NASDAQ", " T"]),
            176,
        )
        .unwrap()
        .unwrap();
        let TransportEvent::TickByTick { req_id, tick } = trade else {
            panic!("expected tick");
        };
        assert_eq!(req_id, 3);
        match tick {
            TickByTick::Trade {
                price,
                size,
                exchange,
                past_limit,
                unreported,
                ..
            } => {
                assert_eq!(price, dec!(189.5));
                assert_eq!(size, dec!(25));
                assert_eq!(exchange, "NASDAQ");
                assert!(!past_limit);
                assert!(unreported);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mid = decode(&fields(&["99", "3", "4", "1767623400", "189.4"]), 176)
            .unwrap()
            .unwrap();
        assert!(matches!(
            mid,
            TransportEvent::TickByTick {
                tick: TickByTick::MidPoint { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_message_skipped() {
        assert_eq!(decode(&fields(&["1", "6", "7", "1", "189.0"]), 176).unwrap(), None);
        assert_eq!(decode(&[], 176).unwrap(), None);
    }
}
