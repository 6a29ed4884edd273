pub mod rite;
