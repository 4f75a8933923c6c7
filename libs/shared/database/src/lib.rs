pub mod directory;
pub mod supabase;

pub use directory::{ClinicDirectory, PatientDirectory};
pub use supabase::SupabaseClient;
