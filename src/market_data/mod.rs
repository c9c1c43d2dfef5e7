// Market data module entrypoint
pub mod adapters;   // market sources (live NSE quotes)
pub mod normaliser; // wire numbers -> prices on a tick grid
pub mod simulator;  // synthetic trades for mock mode and demos
