// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The `BasicMsg` envelope. Field order is fixed: message-name,
//! payload-discriminator, message-id, message-type, progress-requested, route.

use crate::error::WireError;

macro_rules! wire_enum {
    ($name:ident: $repr:ty { $($variant:ident = $value:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_wire(value: $repr) -> Result<Self, WireError> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(WireError::UnknownMessage(other as u16)),
                }
            }

            pub fn to_wire(self) -> $repr {
                self as $repr
            }
        }
    };
}

wire_enum!(MessageName: u16 {
    GetBootMode = 0,
    SetBootMode = 1,
    Flash = 2,
    RamTest = 3,
    ReadI2c = 4,
    WriteI2c = 5,
    GetDbgModules = 6,
    SetDbgModules = 7,
    SetDbgDevice = 8,
    GetDbElem = 9,
    ResetDb = 10,
});

wire_enum!(PayloadDiscriminator: u16 {
    None = 0,
    Status = 1,
    Version = 2,
    BootMode = 3,
    FlashMetadata = 4,
    FlashData = 5,
    I2cData = 6,
    Database = 7,
    Debug = 8,
    RamTest = 9,
});

wire_enum!(MessageType: u8 {
    None = 0,
    Req = 1,
    Ack = 2,
    Prog = 3,
    Done = 4,
});

wire_enum!(Route: u8 {
    None = 0,
    Serial = 1,
    TcpSystem = 2,
    TcpLog = 3,
    UdpClient = 4,
});

impl Route {
    /// The physical channel a reply travels on is the same channel the
    /// request arrived on -- there is no direction bit, so the reply
    /// always echoes the request's own route value.
    pub fn reply_route(self) -> Route {
        self
    }
}

/// The envelope every frame carries, independent of any payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicMsg {
    pub name: MessageName,
    pub discriminator: PayloadDiscriminator,
    pub message_id: u32,
    pub message_type: MessageType,
    pub progress_requested: bool,
    pub route: Route,
}

impl BasicMsg {
    pub fn request(name: MessageName, discriminator: PayloadDiscriminator, message_id: u32, route: Route) -> Self {
        Self {
            name,
            discriminator,
            message_id,
            message_type: MessageType::Req,
            progress_requested: false,
            route,
        }
    }

    /// An `Ack` echoing this envelope, sent with
    /// `payload = none` regardless of the request's discriminator.
    pub fn ack(&self) -> Self {
        Self {
            discriminator: PayloadDiscriminator::None,
            message_type: MessageType::Ack,
            route: self.route.reply_route(),
            ..*self
        }
    }

    /// A `Done` echoing this envelope with the given reply payload kind.
    pub fn done(&self, discriminator: PayloadDiscriminator) -> Self {
        Self {
            discriminator,
            message_type: MessageType::Done,
            route: self.route.reply_route(),
            ..*self
        }
    }

    pub fn prog(&self) -> Self {
        Self {
            discriminator: PayloadDiscriminator::None,
            message_type: MessageType::Prog,
            route: self.route.reply_route(),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_name_round_trips_through_the_wire_repr() {
        for n in [MessageName::GetBootMode, MessageName::Flash, MessageName::ResetDb] {
            assert_eq!(MessageName::from_wire(n.to_wire()).unwrap(), n);
        }
    }

    #[test]
    fn unknown_message_name_is_reported() {
        assert!(matches!(
            MessageName::from_wire(999),
            Err(WireError::UnknownMessage(999))
        ));
    }

    #[test]
    fn ack_always_carries_no_payload() {
        let req = BasicMsg::request(MessageName::ReadI2c, PayloadDiscriminator::I2cData, 7, Route::UdpClient);
        let ack = req.ack();
        assert_eq!(ack.discriminator, PayloadDiscriminator::None);
        assert_eq!(ack.message_type, MessageType::Ack);
        assert_eq!(ack.message_id, 7);
        assert_eq!(ack.route, Route::UdpClient);
    }
}
