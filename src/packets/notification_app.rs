// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Notification-app preference records stored in the `NotificationPrefs`
//! database.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use super::{check_len, read_bytes, PacketDecodeError, PacketEncodeError};

/// Attribute ids used by preference records.
pub mod attribute {
    pub const LAST_UPDATED: u8 = 0x0E;
    pub const APP_NAME: u8 = 0x1E;
    pub const MUTE_DAY_OF_WEEK: u8 = 0x28;
}

/// Days on which notifications from an app are muted.
///
/// The value is a day-of-week bitmask with Sunday in bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MuteState {
    Always,
    Weekends,
    Weekdays,
    #[default]
    Never,
}

impl MuteState {
    pub fn as_byte(self) -> u8 {
        match self {
            MuteState::Always => 127,
            MuteState::Weekends => 65,
            MuteState::Weekdays => 62,
            MuteState::Never => 0,
        }
    }

    /// Unknown masks are treated as not muted.
    pub fn from_byte(value: u8) -> Self {
        match value {
            127 => MuteState::Always,
            65 => MuteState::Weekends,
            62 => MuteState::Weekdays,
            _ => MuteState::Never,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub id: u8,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAction {
    pub id: u8,
    pub action_type: u8,
    pub attributes: Vec<Attribute>,
}

/// A notification-app record as the watch stores it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationAppItem {
    pub flags: u32,
    pub attributes: Vec<Attribute>,
    pub actions: Vec<ItemAction>,
}

impl NotificationAppItem {
    /// Build the record for a locally changed preference.
    pub fn new(app_name: &str, mute_state: MuteState, last_updated: u32) -> Self {
        Self {
            flags: 0,
            attributes: vec![
                Attribute {
                    id: attribute::APP_NAME,
                    content: app_name.as_bytes().to_vec(),
                },
                Attribute {
                    id: attribute::MUTE_DAY_OF_WEEK,
                    content: vec![mute_state.as_byte()],
                },
                Attribute {
                    id: attribute::LAST_UPDATED,
                    content: last_updated.to_le_bytes().to_vec(),
                },
            ],
            actions: Vec::new(),
        }
    }

    pub fn attribute(&self, id: u8) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|attr| attr.id == id)
            .map(|attr| attr.content.as_slice())
    }

    pub fn app_name(&self) -> Option<String> {
        self.attribute(attribute::APP_NAME)
            .map(|name| String::from_utf8_lossy(name).into_owned())
    }

    pub fn mute_state(&self) -> Option<MuteState> {
        match self.attribute(attribute::MUTE_DAY_OF_WEEK)? {
            [mask] => Some(MuteState::from_byte(*mask)),
            _ => None,
        }
    }

    /// Seconds since the epoch at which the watch last changed the record.
    pub fn last_updated(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.attribute(attribute::LAST_UPDATED)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketDecodeError> {
        let mut cursor = Cursor::new(bytes);
        let flags = cursor.read_u32::<LittleEndian>()?;
        let attribute_count = cursor.read_u8()?;
        let action_count = cursor.read_u8()?;

        let attributes = read_attributes(&mut cursor, attribute_count)?;
        let mut actions = Vec::with_capacity(action_count as usize);
        for _ in 0..action_count {
            let id = cursor.read_u8()?;
            let action_type = cursor.read_u8()?;
            let count = cursor.read_u8()?;
            actions.push(ItemAction {
                id,
                action_type,
                attributes: read_attributes(&mut cursor, count)?,
            });
        }

        Ok(Self {
            flags,
            attributes,
            actions,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketEncodeError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.push(count_u8("attributes", self.attributes.len())?);
        buf.push(count_u8("actions", self.actions.len())?);
        write_attributes(&mut buf, &self.attributes)?;
        for action in &self.actions {
            buf.push(action.id);
            buf.push(action.action_type);
            buf.push(count_u8("action attributes", action.attributes.len())?);
            write_attributes(&mut buf, &action.attributes)?;
        }
        Ok(buf)
    }
}

fn read_attributes(
    cursor: &mut Cursor<&[u8]>,
    count: u8,
) -> Result<Vec<Attribute>, PacketDecodeError> {
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = cursor.read_u8()?;
        let len = cursor.read_u16::<LittleEndian>()? as usize;
        attributes.push(Attribute {
            id,
            content: read_bytes(cursor, len)?,
        });
    }
    Ok(attributes)
}

fn write_attributes(buf: &mut Vec<u8>, attributes: &[Attribute]) -> Result<(), PacketEncodeError> {
    for attr in attributes {
        check_len("attribute", &attr.content, u16::MAX as usize)?;
        buf.push(attr.id);
        buf.extend_from_slice(&(attr.content.len() as u16).to_le_bytes());
        buf.extend_from_slice(&attr.content);
    }
    Ok(())
}

fn count_u8(field: &'static str, count: usize) -> Result<u8, PacketEncodeError> {
    u8::try_from(count).map_err(|_| PacketEncodeError::TooLong {
        field,
        len: count,
        max: u8::MAX as usize,
    })
}
