pub mod api;
pub mod game;

pub use api::{
    BetRequest, ClientEvent, DecodeError, Frame, RoundResult, ServerEvent, EVENT_ALERT,
    EVENT_ANOTHER_DEVICE, EVENT_GAME_INIT, EVENT_INTERNAL_ERROR, EVENT_PING, EVENT_PONG,
    EVENT_REQUEST, EVENT_RESULT,
};
pub use game::{
    compact_index, compact_len, ConfigurationError, GameConfiguration, GameInit, PayoutTable,
    RowOption,
};
