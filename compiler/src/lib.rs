//! Cohort query compiler library.
//!
//! Users build cohort definitions as trees of constraints (concepts, cohorts,
//! genomic annotations, AND/OR groups, temporal sequences). This crate keeps
//! those trees consistent while they are edited, lowers them to the flat panel
//! list a query engine executes, and raises stored panel lists back into
//! editable trees.
//!
//! Pipeline: [`ast`] → [`validate`] → [`lower`] → [`ir`], and [`ir`] →
//! [`raise`] → [`ast`] for reloading saved queries.

pub mod ast;
pub mod concept;
pub mod config;
pub mod crypto;
pub mod export;
pub mod ir;
pub mod lower;
pub mod raise;
pub mod validate;
