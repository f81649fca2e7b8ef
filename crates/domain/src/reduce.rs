//! Global reductions over the active voxels of a grid.
//!
//! Reductions are `deviceThenHostManaged` Containers: the accelerator path
//! hands the field storage to a [`BlasEngine`], copies the device scratch to
//! host scratch and synchronizes the stream before reading; the host path
//! accumulates directly. Both visit cells in partition order, so for the
//! reference engine the two paths agree bit for bit.

use std::fmt;
use std::ops::{Add, Mul};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use blockspace_common::{Compute, DataView, Error, Result};
use blockspace_set::{Backend, Body, Container, ExecutionKind, Loadable};

use crate::field::{BlockField, storage_offset};
use crate::grid::BlockGrid;
use crate::partition::PartitionIndexSpace;

pub trait Scalar:
    Copy + Default + PartialEq + fmt::Debug + Send + Sync + Add<Output = Self> + Mul<Output = Self> + 'static
{
    fn sqrt(self) -> Self;
}

impl Scalar for f32 {
    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }
}

impl Scalar for f64 {
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

/// Batched linear-algebra routines run on the accelerator path.
pub trait BlasEngine<T: Scalar>: Send + Sync {
    fn name(&self) -> &str;

    /// Write the dot product of `x` and `y` over the active cells of `space`
    /// into `out[0]`. `x` and `y` are raw field storage.
    fn dot(
        &self,
        space: &PartitionIndexSpace,
        cardinality: usize,
        x: &[T],
        y: &[T],
        out: &mut [T],
    ) -> Result<()>;
}

/// Reference engine: one sequential pass in partition order.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialBlas;

impl<T: Scalar> BlasEngine<T> for SequentialBlas {
    fn name(&self) -> &str {
        "sequential"
    }

    fn dot(
        &self,
        space: &PartitionIndexSpace,
        cardinality: usize,
        x: &[T],
        y: &[T],
        out: &mut [T],
    ) -> Result<()> {
        let slot = out
            .first_mut()
            .ok_or_else(|| Error::construction_invariant("SequentialBlas", "empty output buffer"))?;
        *slot = accumulate_dot(space, cardinality, x, y);
        Ok(())
    }
}

fn accumulate_dot<T: Scalar>(space: &PartitionIndexSpace, cardinality: usize, x: &[T], y: &[T]) -> T {
    let bs = space.block_size();
    let mut acc = T::default();
    for cell in space.cells() {
        for c in 0..cardinality {
            let i = storage_offset(cell, c, bs, cardinality);
            acc = acc + x[i] * y[i];
        }
    }
    acc
}

struct Scratch<T> {
    device: Vec<T>,
    host: Vec<T>,
}

struct ScalarInner<T: Scalar> {
    engine: Arc<dyn BlasEngine<T>>,
    value: Mutex<T>,
    scratch: Vec<Mutex<Scratch<T>>>,
}

/// Result slot of a reduction, with the per-device scratch it runs in.
pub struct PatternScalar<T: Scalar> {
    inner: Arc<ScalarInner<T>>,
}

impl<T: Scalar> Clone for PatternScalar<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Scalar> PatternScalar<T> {
    pub fn new(backend: &Backend, engine: Arc<dyn BlasEngine<T>>) -> Self {
        let scratch = (0..backend.device_count())
            .map(|_| {
                Mutex::new(Scratch {
                    device: vec![T::default(); 1],
                    host: vec![T::default(); 1],
                })
            })
            .collect();
        Self {
            inner: Arc::new(ScalarInner {
                engine,
                value: Mutex::new(T::default()),
                scratch,
            }),
        }
    }

    pub fn get(&self) -> T {
        *self.lock_value()
    }

    pub fn set(&self, value: T) {
        *self.lock_value() = value;
    }

    pub fn engine_name(&self) -> &str {
        self.inner.engine.name()
    }

    fn lock_value(&self) -> MutexGuard<'_, T> {
        self.inner.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scratch(&self, device: usize) -> Result<MutexGuard<'_, Scratch<T>>> {
        let slot = self.inner.scratch.get(device).ok_or_else(|| {
            Error::configuration("PatternScalar", format!("no scratch for device {device}"))
        })?;
        Ok(slot.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: Scalar> fmt::Debug for PatternScalar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternScalar")
            .field("value", &self.get())
            .field("engine", &self.engine_name())
            .finish()
    }
}

fn check_view(backend: &Backend, data_view: DataView) -> Result<()> {
    if data_view != DataView::Standard && backend.device_count() == 1 {
        return Err(Error::usage_pattern(
            "BlockGrid",
            format!(
                "reductions run only on the standard view when there is a single partition, got {data_view}"
            ),
        ));
    }
    if data_view != DataView::Standard {
        return Err(Error::usage_pattern(
            "BlockGrid",
            format!("reductions run only on the standard view, got {data_view}"),
        ));
    }
    Ok(())
}

impl BlockGrid {
    /// Scalar backed by the reference engine.
    pub fn new_pattern_scalar<T: Scalar>(&self) -> PatternScalar<T> {
        PatternScalar::new(self.backend(), Arc::new(SequentialBlas))
    }

    /// `scalar = x · y` over every component of every active voxel.
    pub fn dot<T: Scalar>(
        &self,
        name: impl Into<String>,
        x: &BlockField<T>,
        y: &BlockField<T>,
        scalar: &PatternScalar<T>,
    ) -> Result<Container> {
        self.reduction(name, x, Some(y), scalar, |v| v)
    }

    /// `scalar = sqrt(x · x)`.
    pub fn norm2<T: Scalar>(
        &self,
        name: impl Into<String>,
        x: &BlockField<T>,
        scalar: &PatternScalar<T>,
    ) -> Result<Container> {
        self.reduction(name, x, None, scalar, Scalar::sqrt)
    }

    fn reduction<T: Scalar>(
        &self,
        name: impl Into<String>,
        x: &BlockField<T>,
        y: Option<&BlockField<T>>,
        scalar: &PatternScalar<T>,
        finish: fn(T) -> T,
    ) -> Result<Container> {
        if let Some(foreign) = std::iter::once(x).chain(y).find(|f| !self.same_grid(f.grid())) {
            return Err(Error::configuration(
                "BlockGrid",
                format!("field `{}` belongs to a different grid", foreign.name()),
            ));
        }
        let y = y.filter(|y| y.uid() != x.uid());
        if let Some(y) = y {
            if y.cardinality() != x.cardinality() {
                return Err(Error::configuration(
                    "BlockGrid",
                    format!(
                        "cannot reduce `{}` ({} components) with `{}` ({} components)",
                        x.name(),
                        x.cardinality(),
                        y.name(),
                        y.cardinality()
                    ),
                ));
            }
        }

        self.new_container_with(name, ExecutionKind::DeviceThenHostManaged, |loader| {
            loader.load_with(x, Compute::Reduce);
            if let Some(y) = y {
                loader.load_with(y, Compute::Reduce);
            }
            let device = Reduction {
                grid: self.clone(),
                x: x.clone(),
                y: y.cloned(),
                scalar: scalar.clone(),
                finish,
            };
            let host = device.clone();
            Ok(Body::device_then_host(
                move |stream, data_view| device.run_device(stream, data_view),
                move |_stream, data_view| host.run_host(data_view),
            ))
        })
    }
}

struct Reduction<T: Scalar> {
    grid: BlockGrid,
    x: BlockField<T>,
    y: Option<BlockField<T>>,
    scalar: PatternScalar<T>,
    finish: fn(T) -> T,
}

impl<T: Scalar> Clone for Reduction<T> {
    fn clone(&self) -> Self {
        Self {
            grid: self.grid.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            scalar: self.scalar.clone(),
            finish: self.finish,
        }
    }
}

impl<T: Scalar> Reduction<T> {
    fn with_operands<R>(&self, f: impl FnOnce(&[T], &[T]) -> R) -> R {
        match &self.y {
            Some(y) => self.x.with_data(|xd| y.with_data(|yd| f(xd, yd))),
            None => self.x.with_data(|xd| f(xd, xd)),
        }
    }

    fn run_device(&self, stream: usize, data_view: DataView) -> Result<()> {
        let backend = self.grid.backend();
        check_view(backend, data_view)?;
        let device = 0;
        let space = self.grid.partition_space(device, data_view)?;
        let stream = backend.stream(device, stream)?;
        let card = self.x.cardinality();

        let mut scratch = self.scalar.scratch(device)?;
        let Scratch { device: dev, host } = &mut *scratch;
        self.with_operands(|x, y| self.scalar.inner.engine.dot(space, card, x, y, dev))?;
        host.copy_from_slice(dev);
        stream.sync();
        let value = (self.finish)(host[0]);
        drop(scratch);

        tracing::trace!(engine = self.scalar.engine_name(), ?value, "device reduction");
        self.scalar.set(value);
        Ok(())
    }

    fn run_host(&self, data_view: DataView) -> Result<()> {
        check_view(self.grid.backend(), data_view)?;
        let space = self.grid.partition_space(0, data_view)?;
        let card = self.x.cardinality();
        let acc = self.with_operands(|x, y| accumulate_dot(space, card, x, y));
        self.scalar.set((self.finish)(acc));
        Ok(())
    }
}
