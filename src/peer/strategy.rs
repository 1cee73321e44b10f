//! Dispatches an inbound `Message` to the handful of BEP-10/9 hooks a
//! metadata-only session cares about.
//!
//! Generalised from the teacher's synchronous `Behaviour` trait (same
//! dispatch shape: route extended messages by id, then by `ut_metadata`
//! `msg_type`) into an async trait so hooks can themselves await I/O (e.g.
//! sending the next piece request).

use async_trait::async_trait;

use crate::peer::extended::{self, MsgType};
use crate::peer::message::Message;

#[async_trait]
pub trait Behaviour: Send {
  async fn handle_message(&mut self, message: &Message) -> crate::peer::session::Result<()> {
    match message {
      Message::Extended { id, payload } => self.handle_extended(*id, payload).await,
      _ => Ok(()),
    }
  }

  async fn handle_extended(&mut self, id: u8, payload: &[u8]) -> crate::peer::session::Result<()> {
    if id == 0 {
      self.extension_handshake(payload).await
    } else {
      let (msg, offset) = extended::UtMetadata::parse(payload).map_err(crate::peer::session::Error::from)?;
      match msg.msg_type {
        MsgType::Data => self.ut_metadata_data(msg, &payload[offset..]).await,
        MsgType::Request => self.ut_metadata_request(msg).await,
        MsgType::Reject => self.ut_metadata_reject(msg).await,
      }
    }
  }

  async fn extension_handshake(&mut self, payload: &[u8]) -> crate::peer::session::Result<()>;
  async fn ut_metadata_data(&mut self, msg: extended::UtMetadata, piece: &[u8]) -> crate::peer::session::Result<()>;
  async fn ut_metadata_request(&mut self, msg: extended::UtMetadata) -> crate::peer::session::Result<()>;
  async fn ut_metadata_reject(&mut self, msg: extended::UtMetadata) -> crate::peer::session::Result<()>;
}
