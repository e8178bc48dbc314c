pub mod bases;
pub mod destroy;
pub mod inspect;
pub mod list;
pub mod run;
