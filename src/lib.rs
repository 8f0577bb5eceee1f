// Molecule substrate: atoms, bonds, rings, formulas
pub mod formula;
pub mod molecule;

// Data IO
pub mod loader;

// Fragments, cut enumeration, the fragmentation graph
pub mod fragment;
pub mod fragmenter;
pub mod graph;

// Scoring models and the reference tree they read
pub mod ftree;
pub mod scoring;

// Subtree extraction
pub mod calculator;
pub mod critical_path;
pub mod manipulator;
pub mod pcst;
pub mod prim;
pub mod subtree;
