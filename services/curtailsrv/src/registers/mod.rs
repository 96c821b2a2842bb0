//! Virtual device register model

pub mod codec;
pub mod layout;
pub mod map;

pub use codec::{decode_f32, encode_f32, BitPosition};
pub use layout::{
    Bank, BitPoint, DecodedPoint, EchoRule, Encoding, LayoutPoints, NamedBit, PointValue,
    RegisterEntry, RegisterLayout,
};
pub use map::RegisterMap;
