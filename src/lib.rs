
// Error types shared by every layer below
pub mod error;

// External data representation, a protocol for serializing data to be sent over the network
pub mod xdr;

// Remote procedure call, a protocol build on top of XDR to provide something like C-style function calls over the network
pub mod rpc;

// A protocol using RPC that's meant to communicate with instruments over LAN
pub mod vxi11;

// Resource names, the Instrument trait and the serial, LAN and simulated transports behind it
pub mod bus;

// Drivers for the temperature controller and the voltmeter
pub mod devices;

// Expected identification strings of the two instruments
pub mod settings;

// Finding the instruments among the bus resources
pub mod discovery;

// The temperature sweep itself
pub mod sweep;

// Background thread running a sweep and the channel back to the interface
pub mod worker;

// Append-only sample log
pub mod datalog;

// Resistance vs temperature chart state
pub mod plot;

// Perform a 1-D least squared linear fit
pub mod utils;
