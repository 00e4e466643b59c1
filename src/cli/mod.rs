pub mod classify;
pub mod doctor;
pub mod flush;
pub mod persona;
pub mod turn;

pub use classify::classify;
pub use doctor::doctor;
pub use flush::flush;
pub use persona::persona;
pub use turn::turn;
