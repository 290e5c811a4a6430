//! In-memory contact list mirrored to the store.

use tracing::{debug, info};

use cypherchat_shared::{ChainAddress, ChatError};
use cypherchat_store::{Contact, Database};

use crate::error::Result;

#[derive(Debug, Default, Clone)]
pub struct ContactBook {
    contacts: Vec<Contact>,
}

impl ContactBook {
    /// Read every saved contact, in the order they were added.
    pub fn load(db: &Database) -> Result<Self> {
        let contacts = db.list_contacts()?;
        info!(count = contacts.len(), "Loaded contacts");
        Ok(Self { contacts })
    }

    /// Validate, persist, then append. On any error the book is unchanged.
    pub fn add(&mut self, db: &Database, name: &str, address: &str) -> Result<Contact> {
        let address = ChainAddress::parse(address)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("Contact name is required.".into()).into());
        }

        if self.find(&address).is_some() {
            debug!(address = %address, "Adding a second contact for a known address");
        }

        let contact = Contact::new(name, address);
        db.insert_contact(&contact)?;
        self.contacts.push(contact.clone());
        Ok(contact)
    }

    pub fn all(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn find(&self, address: &ChainAddress) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.address == address)
    }

    /// Resolve a contact by exact name (case-insensitive) or by address.
    pub fn resolve(&self, query: &str) -> Option<&Contact> {
        let query = query.trim();
        if let Ok(address) = ChainAddress::parse(query) {
            return self.find(&address);
        }
        self.contacts
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(query))
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}
