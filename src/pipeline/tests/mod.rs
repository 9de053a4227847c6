mod common;

mod initializer;
mod routing;
