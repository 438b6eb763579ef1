pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::{finish, login, logout};

pub mod me;
pub use self::me::me;

pub mod proxy;
pub use self::proxy::{pgt_callback, service_proxy};
