//! Launch description support for the nodemgr daemon
//!
//! # Overview
//!
//! - Expand `$(find ..)`, `$(env ..)`, `$(optenv ..)`, `$(arg ..)` and
//!   `$(dirname)` tokens into absolute paths
//! - Locate packages (directories with a `package.xml`) under search roots
//! - Parse `<launch>` XML documents for declared arguments and nodes
//! - Scan documents line by line for include directives
//!
//! # Example Launch Description
//!
//! ```xml
//! <launch>
//!   <arg name="robot_name" default="r2"/>
//!   <include file="$(find robot_bringup)/launch/sensors.launch"/>
//!   <node pkg="camera_driver" type="camera_node" name="camera" ns="$(arg robot_name)"/>
//! </launch>
//! ```

pub mod config;
pub mod package;

pub use config::{
    argv, ArgDeclaration, IncludeDirective, IncludeScanner, LaunchFile, LaunchFileError,
    NodeDeclaration, SubstitutionContext, SubstitutionError, DEFAULT_INCLUDE_PATTERNS,
};
pub use package::{Package, PackageError, PackageLocator, PackagePath};
