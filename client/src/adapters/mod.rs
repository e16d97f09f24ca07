//! Game modes plugged into the phase machine

pub mod battle;
pub mod board;
pub mod relay;

pub use battle::BattleMode;
pub use board::BoardMode;
pub use relay::RelayMode;

use crate::host::ContentGenerator;
use crate::phase::{PlayerId, RoundAdapter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Everything the coordinator needs to run one kind of match
pub trait GameMode {
    type Generator: ContentGenerator<Content = Self::Content>;
    /// Shared content, as carried in `START`
    type Content: Clone + Debug + PartialEq + Serialize + DeserializeOwned;
    type Adapter: RoundAdapter;

    fn name(&self) -> &'static str;

    fn generator(&self) -> Self::Generator;

    fn build_adapter(
        &self,
        content: &Self::Content,
        participants: &[PlayerId],
        local_id: &str,
    ) -> Self::Adapter;
}
