use crate::assembly::SchurAssembler;
use crate::blocks::ElementBlockStore;
use crate::connectivity::{ElementDofs, TraceDofs};
use crate::error::CondensationError;
use crate::matrix::{PartitionedSchurMatrix, SchurMatrixAssembly, SerialSchurMatrix};
use crate::options::CondensationOptions;
use crate::partition::DofPartition;
use crate::Real;
use std::ops::Range;

/// The dof partition and element block storage of a static condensation.
///
/// This is the part of the condensation that outlives assembly: it is needed to reduce
/// right-hand sides and to reconstruct full solutions from reduced ones. It is owned by the
/// [`SchurAssembler`] during assembly and by the resulting
/// [`ReducedSystem`](crate::system::ReducedSystem) afterwards.
///
/// If the underlying finite element spaces change, a new condensation must be created with
/// [`init`](Self::init).
#[derive(Debug, Clone)]
pub struct StaticCondensation<T> {
    pub(crate) partition: DofPartition,
    pub(crate) blocks: ElementBlockStore<T>,
    pub(crate) options: CondensationOptions<T>,
}

impl<T: Real> StaticCondensation<T> {
    /// Partitions the dofs of `space` with respect to `trace` and allocates storage for all
    /// element blocks.
    pub fn init(
        space: &impl ElementDofs,
        trace: &impl TraceDofs,
        options: CondensationOptions<T>,
    ) -> Result<Self, CondensationError> {
        let partition = DofPartition::new(space, trace)?;
        Ok(Self::from_partition(partition, options))
    }

    pub fn from_partition(partition: DofPartition, options: CondensationOptions<T>) -> Self {
        let private_counts: Vec<_> = (0..partition.num_elements())
            .map(|e| partition.element_private_dofs(e).len())
            .collect();
        let exposed_counts: Vec<_> = (0..partition.num_elements())
            .map(|e| partition.element_exposed_dofs(e).len())
            .collect();
        let blocks = ElementBlockStore::new(&private_counts, &exposed_counts, options.symmetry);
        Self {
            partition,
            blocks,
            options,
        }
    }

    pub fn partition(&self) -> &DofPartition {
        &self.partition
    }

    pub fn blocks(&self) -> &ElementBlockStore<T> {
        &self.blocks
    }

    pub fn options(&self) -> &CondensationOptions<T> {
        &self.options
    }

    /// The number of private dofs.
    pub fn num_private_dofs(&self) -> usize {
        self.partition.num_private_dofs()
    }

    /// The number of exposed dofs, which is the dimension of the reduced system.
    pub fn num_exposed_dofs(&self) -> usize {
        self.partition.num_exposed_dofs()
    }

    /// Starts assembly into the given reduced matrix backend.
    ///
    /// # Panics
    ///
    /// Panics if the backend does not have one row per exposed dof.
    pub fn assembler<M: SchurMatrixAssembly<T>>(self, backend: M) -> SchurAssembler<T, M> {
        assert_eq!(
            backend.num_rows(),
            self.num_exposed_dofs(),
            "Reduced matrix must have one row per exposed dof"
        );
        SchurAssembler::new(self, backend)
    }

    /// Starts assembly into a reduced matrix stored entirely in this process.
    pub fn serial_assembler(self) -> SchurAssembler<T, SerialSchurMatrix<T>> {
        let backend = SerialSchurMatrix::new(self.num_exposed_dofs());
        self.assembler(backend)
    }

    /// Starts assembly into a reduced matrix of which only `owned_rows` are stored locally.
    pub fn partitioned_assembler(self, owned_rows: Range<usize>) -> SchurAssembler<T, PartitionedSchurMatrix<T>> {
        let backend = PartitionedSchurMatrix::new(self.num_exposed_dofs(), owned_rows);
        self.assembler(backend)
    }

    /// See [`DofPartition::convert_marker_to_reduced_true_dofs`].
    pub fn convert_marker_to_reduced_true_dofs(&self, marker: &[bool]) -> Result<Vec<bool>, CondensationError> {
        self.partition.convert_marker_to_reduced_true_dofs(marker)
    }

    /// See [`DofPartition::convert_list_to_reduced_true_dofs`].
    pub fn convert_list_to_reduced_true_dofs(&self, list: &[usize]) -> Result<Vec<usize>, CondensationError> {
        self.partition.convert_list_to_reduced_true_dofs(list)
    }
}
