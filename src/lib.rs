#![warn(missing_docs)]
/*! A framework for running flow-graph dataflow applications: blocks
connected by typed, rate-carrying pipes.

It's heavily inspired by [GNURadio][gnuradio] and by this crate's own
prior single-process scheduler, reworked around two changes: blocks can
now offer more than one type signature (so the same `Multiply` block
works on real or complex samples, picked by what's actually upstream),
and a graph can be run either cooperatively in one task or as one
forked OS process per block.

# Architecture overview

A graph is a [`composite::Composite`]: a set of blocks, each
implementing [`block::Block`], wired together by [`composite::Composite::connect`].
Composites nest -- [`composite::Composite::merge_in`] folds one
composite's blocks into another, carrying over any ports the nested
composite exposed as its own ("aliased ports").

Before a composite can run, [`composite::Composite::prepare_to_run`]:

1. checks every block input is connected;
2. computes a topological execution order ([`analyzer`]);
3. differentiates every block's type signature and propagates sample
   rates, in that order, so a type-mismatched or rate-mismatched graph
   fails fast with the offending block named;
4. initializes every block, then allocates the OS pipe backing every
   connection.

From there, either driver can run it:

- [`coop::CooperativeDriver`] ticks every block round-robin in the
  calling task, skipping a block's known-idle downstream when it
  produces nothing ([`analyzer::skip_sets`]).
- [`process::ProcessDriver`] forks one process per block; each child
  closes every pipe fd it doesn't own before running its block to
  completion, so a crashed or hung block can't wedge its siblings.

# Example

```
use rustradio::composite::Composite;
use rustradio::coop::CooperativeDriver;
use rustradio::blocks::{VectorSource, VectorSink};

let mut g = Composite::new("example");
let src = g.add(Box::new(VectorSource::new(vec![1.0, 2.0, 3.0])));
let sink = g.add(Box::new(VectorSink::new()));
g.connect(src, "out", sink, "in")?;

let mut driver = CooperativeDriver::new(&mut g)?;
driver.run(&mut g)?;
# Ok::<(), rustradio::Error>(())
```
*/
pub mod analyzer;
pub mod block;
pub mod blocks;
pub mod composite;
pub mod config;
pub mod coop;
pub mod error;
pub mod port;
pub mod process;
pub mod types;

pub use error::{Error, Result};
