// Pose math and key-grip composition
pub mod geometry;

// Hand-joint and tracked-object samples
pub mod sensor;

// Collision pair classification
pub mod collision;

// Scene host capability surface
pub mod scene;

// Unlock signal to the lock device
pub mod unlock;

// Per-box state machines
pub mod modules;

// Session actor and module routing
pub mod session;

// Configuration
pub mod config;

// JSON-lines replay traces
pub mod trace;
