//! Contact list persistence.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use cypherchat_shared::ChainAddress;

use crate::database::Database;
use crate::error::Result;
use crate::models::Contact;

impl Database {
    /// Append a contact. Duplicate addresses are accepted.
    pub fn insert_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (id, name, address, added_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                contact.id.to_string(),
                contact.name,
                contact.address.to_hex(),
                contact.added_at.to_rfc3339(),
            ],
        )?;
        tracing::debug!(address = %contact.address, name = %contact.name, "contact saved");
        Ok(())
    }

    /// All contacts in the order they were added.
    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, address, added_at
             FROM contacts
             ORDER BY rowid ASC",
        )?;

        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let address_str: String = row.get(2)?;
    let added_str: String = row.get(3)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let address = ChainAddress::parse(&address_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let added_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&added_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Contact {
        id,
        name,
        address,
        added_at,
    })
}
