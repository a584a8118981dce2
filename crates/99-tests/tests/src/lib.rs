//! End-to-end suite: a guest display and a host backend sharing one region.

#[cfg(test)]
mod harness;

#[cfg(test)]
mod scenarios;

#[cfg(all(test, not(target_arch = "wasm32")))]
mod threaded;
