use crate::{
    error::{RelayError, Result},
    media::OutputHandle,
    stream::{StreamDescriptor, StreamIndexMap},
};

/// Output layout produced by [`mirror`].
#[derive(Debug)]
pub struct Mirror<C> {
    pub streams: Vec<StreamDescriptor<C>>,
    pub index_map: StreamIndexMap,
}

/// Appends one output stream per input stream, in input order, carrying the
/// same codec parameters. The time base of every created stream is the one
/// the output assigned, which may differ from the input's.
pub fn mirror<O>(inputs: &[StreamDescriptor<O::Codec>], output: &mut O) -> Result<Mirror<O::Codec>>
where
    O: OutputHandle,
{
    let mut streams = Vec::with_capacity(inputs.len());
    let mut index_map = StreamIndexMap::new();

    for input in inputs {
        let created = output
            .add_stream(input.parameters(), input.time_base())
            .map_err(|e| match e {
                RelayError::Topology { .. } => e,
                other => RelayError::topology(output.address(), input.index(), other),
            })?;

        if index_map.iter().any(|(_, o)| o == created.index()) {
            return Err(RelayError::topology(
                output.address(),
                input.index(),
                format!("output stream {} allocated twice", created.index()),
            ));
        }

        log::info!(
            "mirror {}: input stream {} ({}) -> output stream {} ({})",
            output.address(),
            input.index(),
            input.time_base(),
            created.index(),
            created.time_base()
        );
        index_map.insert(input.index(), created.index());
        streams.push(created);
    }

    Ok(Mirror { streams, index_map })
}
