pub use crate::args::*;
pub use crate::bridge::*;
pub use crate::callable::*;
use crate::callbacks::*;
pub use crate::options::*;
pub use crate::proxy::*;
use crate::queue::*;
pub use crate::registry::*;
use fxhash::*;
use std::cell::*;
use std::collections::*;
use std::mem::*;
use std::rc::*;
pub use tether_marshal::*;

mod args;
mod bridge;
mod callable;
mod callbacks;
mod options;
mod proxy;
mod queue;
mod registry;
