//! Contact book entries from a structured record.

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use super::{stored, stored_id, text_field, CapabilityHandler, HandlerReport, SegmentContext};
use crate::domain::{ExtractedRecord, Tag};
use crate::store::{Gateway, NewContact, Table};

pub struct ContactsHandler {
    gateway: Gateway,
}

impl ContactsHandler {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

/// Build a contact from the record; `None` when it carries no contact field
pub fn contact_from_record(record: &ExtractedRecord, transcript_id: i64) -> Option<NewContact> {
    let contact = NewContact {
        first_name: text_field(record, "first_name"),
        last_name: text_field(record, "last_name"),
        phone: text_field(record, "phone"),
        email: text_field(record, "email"),
        note: text_field(record, "note"),
        source_transcription_id: Some(transcript_id),
    };

    let has_any = contact.first_name.is_some()
        || contact.last_name.is_some()
        || contact.phone.is_some()
        || contact.email.is_some()
        || contact.note.is_some();

    has_any.then_some(contact)
}

#[async_trait]
impl CapabilityHandler for ContactsHandler {
    fn tag(&self) -> Tag {
        Tag::Contacts
    }

    async fn handle(&self, ctx: &SegmentContext<'_>) -> Result<HandlerReport> {
        let record = ctx.require_record()?;
        let Some(contact) = contact_from_record(record, ctx.transcript_id) else {
            bail!("Contact record has no name, phone, email or note");
        };

        if contact.first_name.is_none() && contact.last_name.is_none() {
            warn!(transcript_id = ctx.transcript_id, "Saving contact without a name");
        }

        let id = stored_id(self.gateway.save_contact(contact).await, "contact")?;
        info!(id, "Contact saved");
        Ok(stored(Table::Contacts, id))
    }
}
