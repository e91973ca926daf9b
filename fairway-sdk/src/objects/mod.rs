pub mod ids;
pub mod round;

pub use ids::{GuildId, RoundId, TagNumber, UserId};
pub use round::{
    Participant, ParticipantScore, Response, RoundInfo, RoundState, TeamGrouping,
    UnknownResponse,
};
