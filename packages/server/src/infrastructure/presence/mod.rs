//! インメモリのプレゼンス状態
//!
//! - `connection_registry`: 接続中ユーザーと接続の対応
//! - `room_table`: ルームごとのメンバーとブロードキャスト状態
//!
//! プロセス再起動で全て失われる。クライアントの再接続で再構築される。

pub mod connection_registry;
pub mod room_table;

pub use connection_registry::ConnectionRegistry;
pub use room_table::{RemoveOutcome, RoomTable};
