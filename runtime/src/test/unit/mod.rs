mod config;
mod kernel;
mod verify;
