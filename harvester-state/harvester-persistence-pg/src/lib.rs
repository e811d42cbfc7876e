pub mod db;
mod entities;
mod mapping;
mod trait_impl;
