pub mod booking;
pub mod lesson;
pub mod member;
pub mod notify;
pub mod payment;
pub mod repository;
pub mod slot;
pub mod token;

pub use booking::{BillingMode, Booking, BookingStatus, PaymentStatus};
pub use member::{normalize_code, Member, MemberError, MemberUpdate};
pub use slot::{SlotError, SlotHandle, SlotKey, SlotState};
pub use token::{BookingSnapshot, TokenCodec, TokenError};
